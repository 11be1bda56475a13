//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gate.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request gate.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Deployment environment. Controls the `Secure` cookie flag.
    pub environment: Environment,

    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// CSRF double-submit cookie settings.
    pub csrf: CsrfConfig,

    /// Rate limiting policies.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Parse an environment name as found in `FEEDVOTE_ENV`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Self::Production),
            "development" | "dev" | "test" => Some(Self::Development),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// CSRF guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Name of the token cookie.
    pub cookie_name: String,

    /// Request header carrying the submitted token.
    pub header_name: String,

    /// Cookie lifetime (`Max-Age`) in seconds.
    pub ttl_secs: u64,

    /// Force the `Secure` flag on or off. Derived from the environment when unset.
    pub secure: Option<bool>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "feedvote-csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            ttl_secs: 3600,
            secure: None,
        }
    }
}

/// A single fixed-window policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Requests allowed per window.
    pub max_requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Message returned in the 429 body.
    pub message: String,
}

impl RateLimitPolicy {
    /// Policy for authentication endpoints: 5 requests per minute.
    pub fn auth() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
            message: "Too many authentication attempts. Please try again later.".to_string(),
        }
    }

    /// Policy for general API endpoints: 60 requests per minute.
    pub fn api() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            message: "Too many requests. Please try again later.".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Policy applied to `/auth/*`.
    pub auth: RateLimitPolicy,

    /// Policy applied to `/api/*` and the token endpoint.
    pub api: RateLimitPolicy,

    /// Interval between sweeps of expired counters, in seconds.
    pub sweep_interval_secs: u64,

    /// Header the fronting proxy sets to the client address (e.g. `x-real-ip`).
    /// Unset means the TCP peer address identifies the client.
    pub client_ip_header: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth: RateLimitPolicy::auth(),
            api: RateLimitPolicy::api(),
            sweep_interval_secs: 60,
            client_ip_header: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
