pub mod app;
pub mod app_config;
pub mod error;
pub mod trading;

/// APP_ENV 为该值时只输出控制台日志
pub const ENVIRONMENT_LOCAL: &str = "local";
