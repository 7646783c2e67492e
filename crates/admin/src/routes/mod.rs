pub mod config;
pub mod counters;
pub mod error;
pub mod health;
pub mod metrics;
pub mod projects;
pub mod stats;
