pub mod constants;
pub mod content;
pub mod engine;
pub mod group_finder;
pub mod history_store;
pub mod log;
pub mod memory;
pub mod party;
pub mod providers;
pub mod rng;
pub mod server_protocol;
pub mod server_utils;
pub mod settings;
pub mod types;
