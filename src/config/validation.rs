//! Configuration validation.
//!
//! Semantic checks that serde cannot express. Returns every problem found,
//! not just the first.

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::{GateConfig, RateLimitPolicy};

/// Longest accepted rate-limit window: one day.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// A single semantic problem in a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address '{0}' is not a socket address")]
    BindAddress(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be at most {max} seconds")]
    WindowTooLong { field: &'static str, max: u64 },

    #[error("csrf.cookie_name '{0}' is not a valid cookie name")]
    CookieName(String),

    #[error("csrf.header_name '{0}' is not a valid header name")]
    HeaderName(String),

    #[error("rate_limit.client_ip_header '{0}' is not a valid header name")]
    ClientIpHeader(String),
}

/// Validate a configuration, collecting all errors.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_body_size" });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.request_secs" });
    }

    if config.csrf.ttl_secs == 0 {
        errors.push(ValidationError::Zero { field: "csrf.ttl_secs" });
    }
    if !is_cookie_name(&config.csrf.cookie_name) {
        errors.push(ValidationError::CookieName(config.csrf.cookie_name.clone()));
    }
    if HeaderName::from_bytes(config.csrf.header_name.as_bytes()).is_err() {
        errors.push(ValidationError::HeaderName(config.csrf.header_name.clone()));
    }

    validate_policy(
        &config.rate_limit.auth,
        ("rate_limit.auth.max_requests", "rate_limit.auth.window_secs"),
        &mut errors,
    );
    validate_policy(
        &config.rate_limit.api,
        ("rate_limit.api.max_requests", "rate_limit.api.window_secs"),
        &mut errors,
    );
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::Zero { field: "rate_limit.sweep_interval_secs" });
    }
    if let Some(name) = &config.rate_limit.client_ip_header {
        if HeaderName::from_bytes(name.trim().as_bytes()).is_err() {
            errors.push(ValidationError::ClientIpHeader(name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_policy(
    policy: &RateLimitPolicy,
    (max_field, window_field): (&'static str, &'static str),
    errors: &mut Vec<ValidationError>,
) {
    if policy.max_requests == 0 {
        errors.push(ValidationError::Zero { field: max_field });
    }
    if policy.window_secs == 0 {
        errors.push(ValidationError::Zero { field: window_field });
    } else if policy.window_secs > MAX_WINDOW_SECS {
        errors.push(ValidationError::WindowTooLong {
            field: window_field,
            max: MAX_WINDOW_SECS,
        });
    }
}

// RFC 6265 cookie-name is an RFC 7230 token.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}
