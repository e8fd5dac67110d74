pub mod env;
pub mod log;
pub mod trader_config;
pub mod transaction;
