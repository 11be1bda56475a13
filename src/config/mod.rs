//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, FEEDVOTE_ENV override)
//!     → validation.rs (semantic checks)
//!     → GateConfig (validated, immutable)
//!
//! With --watch:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rate-limit policies swapped in place
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only rate-limit policies are hot-reloadable; the rest needs a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CsrfConfig, Environment, GateConfig, ListenerConfig, ObservabilityConfig, RateLimitConfig,
    RateLimitPolicy, TimeoutConfig,
};
