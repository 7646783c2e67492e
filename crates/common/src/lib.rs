//! Shared configuration and error types for the mixgate workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AdminConfig, AppConfig, ForwarderConfig, RateLimitConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
pub use error::{MixgateError, MixgateResult};
pub use types::ProjectId;
