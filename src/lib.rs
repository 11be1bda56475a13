//! Request gate for the feedvote API: CSRF double-submit checks and
//! fixed-window rate limiting in front of state-changing handlers.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GateConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
