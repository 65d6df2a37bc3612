pub mod config;
pub mod database;
pub mod directory;
pub mod errors;
pub mod forwarder;
pub mod handlers;
pub mod jwks;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod store;
pub mod validation;
