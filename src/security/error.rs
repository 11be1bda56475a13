//! Request-gating errors.

use thiserror::Error;

/// Why a gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// CSRF header missing or not equal to the token cookie.
    #[error("Invalid CSRF token")]
    InvalidToken,

    /// Client exceeded its quota for the current window.
    #[error("{message}")]
    RateLimited {
        message: String,
        limit: u32,
        retry_after_secs: u64,
        reset_at_secs: u64,
    },
}

impl GateError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidToken => 403,
            Self::RateLimited { .. } => 429,
        }
    }
}
