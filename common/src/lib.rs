// Core of the cron HTTP trigger engine: registry, reconciliation and live scheduling

pub mod config;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod telemetry;
pub mod validation;
