//! Configuration system for the pocket hedge fund engine
//!
//! This module provides layered configuration: built-in defaults or a named risk
//! profile, then a JSON or YAML file, then environment variables.

pub mod error;
pub mod loader;
pub mod profiles;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use profiles::RiskProfile;
pub use schema::EngineConfig;
