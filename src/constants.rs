pub const SCHEDULER_TICK_MS: u64 = 1_000;

pub const DEFAULT_PARTY_SIZE: usize = 3;
pub const DEFAULT_STEP_TIME_MS: u64 = 15_000;
pub const DEFAULT_DUNGEON_BASE_COST: u64 = 25;
pub const DEFAULT_DUNGEON_LEVEL_COST: u64 = 10;
pub const DEFAULT_DAILY_BONUS_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_CRIT_CHANCE: f64 = 0.25;
pub const DEFAULT_CRIT_BONUS: f64 = 0.5;
pub const DEFAULT_DEATH_CHANCE: f64 = 0.25;
pub const DEFAULT_MAX_LEVEL: u32 = 20;

pub const GROUP_FINDER_TIMER_NAME: &str = "GroupFinder";
pub const DAY_MS: u64 = 24 * 60 * 60 * 1000;

pub const MIN_LEVEL_COEFFICIENT: f64 = 0.75;
pub const MAX_CLASS_DUPLICATES: usize = 2;

pub const BASE_EXPERIENCE: f64 = 11.0;
pub const EXPERIENCE_PER_LEVEL: f64 = 3.0;
pub const BASE_CURRENCY: f64 = 50.0;
pub const CURRENCY_LEVEL_RATE: f64 = 0.05;

pub fn base_experience(level: u32) -> f64 {
    BASE_EXPERIENCE + (level as f64 - 2.0) * EXPERIENCE_PER_LEVEL
}

pub fn base_currency(level: u32) -> f64 {
    BASE_CURRENCY * (1.0 + CURRENCY_LEVEL_RATE * level as f64)
}

pub fn dungeon_cost(base_cost: u64, level_cost: u64, level: u32) -> u64 {
    base_cost + level_cost * level as u64
}

pub fn level_coefficient(level: u32, max_level: u32) -> f64 {
    if max_level == 0 {
        return 1.0;
    }
    (level as f64 / max_level as f64).max(MIN_LEVEL_COEFFICIENT)
}
