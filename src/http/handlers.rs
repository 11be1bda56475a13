//! Stand-in handlers behind the gates.
//!
//! The real feedback endpoints live in the application; these answer once a
//! request has cleared every gate on its route.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    http::{Method, Uri},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: u64,
}

pub async fn health_handler() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    })
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub status: &'static str,
    pub method: String,
    pub path: String,
}

pub async fn accepted_handler(method: Method, uri: Uri) -> Json<Accepted> {
    Json(Accepted {
        status: "accepted",
        method: method.to_string(),
        path: uri.path().to_string(),
    })
}
