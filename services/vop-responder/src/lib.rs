pub mod accounts;
pub mod config;
pub mod handlers;
pub mod metrics;
