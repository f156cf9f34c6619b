//! Settings and configuration module
//!
//! Provides the immutable agent configuration with:
//! - Builder pattern
//! - YAML settings file loading
//! - Environment-provided credentials

pub mod settings;

pub use settings::{
    AgentConfig, AgentConfigBuilder, CacheSettings, Credentials, CredentialPresence, DelayRange,
    NoiseTarget, SessionPolicy, Toggle, BIND_ENV, CONFIG_PATH_ENV, MAX_DELAY, PASSWORD_ENV,
    USERNAME_ENV,
};
