pub mod config;
pub mod dirs;

pub use config::AppConfig;
