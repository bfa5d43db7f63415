pub mod api;
pub mod config;
pub mod logs;
pub mod proxy;
pub mod types;
