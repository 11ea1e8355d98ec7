pub const DEFAULT_CLASS_ID: u32 = 1;
pub const DEFAULT_STARTING_CURRENCY: u64 = 500;

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Adventurer".to_string();
    }
    trimmed.chars().take(16).collect()
}

pub fn normalize_level(value: Option<i64>, max_level: u32) -> u32 {
    value.unwrap_or(1).clamp(1, max_level.max(1) as i64) as u32
}

pub fn normalize_class_id(value: Option<i64>) -> u32 {
    value
        .and_then(|raw| u32::try_from(raw).ok())
        .unwrap_or(DEFAULT_CLASS_ID)
}

pub fn player_order_key(player_id: &str) -> u64 {
    player_id
        .rsplit('_')
        .next()
        .and_then(|suffix| suffix.parse::<u64>().ok())
        .unwrap_or(u64::MAX)
}

pub fn parse_history_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}
