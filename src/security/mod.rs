//! Request gating subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request on a gated route:
//!     → rate_limit.rs (count under client_id.rs identifier, 429 when over quota)
//!     → csrf.rs (double-submit check on non-safe methods, 403 on mismatch)
//!     → route handler
//!     ← csrf.rs attaches a new token cookie when one was issued
//! ```
//!
//! # Design Decisions
//! - The two gates share no state and can be layered independently
//! - All state is process-local; nothing survives a restart

pub mod client_id;
pub mod csrf;
pub mod error;
pub mod rate_limit;

pub use client_id::{resolve_client_id, PlatformIp};
pub use csrf::{CsrfGuard, CsrfOutcome, IssuedToken};
pub use error::GateError;
pub use rate_limit::{Clock, ManualClock, RateLimitStore, RateLimiter, SystemClock};
