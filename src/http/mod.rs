//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, connect info for client IPs)
//!     → request.rs (request ID)
//!     → security gates (rate limit, CSRF)
//!     → handlers.rs
//!     → response.rs (JSON errors for refused requests)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{GateState, HttpServer};
