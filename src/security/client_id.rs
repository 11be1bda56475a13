//! Client identifier resolution for rate limiting.
//!
//! Order of preference:
//! 1. the client address reported by the platform, see [`PlatformIp`]
//! 2. the first hop of `x-forwarded-for`
//! 3. the literal `"unknown"`, a single bucket shared by every unidentifiable client

use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Bucket used when nothing identifies the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the identifier a request is counted under.
pub fn resolve_client_id(platform_ip: Option<IpAddr>, headers: &HeaderMap) -> String {
    if let Some(ip) = platform_ip {
        return ip.to_string();
    }

    forwarded_for(headers).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Where the platform-reported client address comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlatformIp {
    /// The TCP peer address. Only meaningful when clients connect directly.
    #[default]
    Peer,
    /// A header the fronting proxy sets to the client address, e.g. `x-real-ip`.
    /// The peer address is ignored.
    Header(HeaderName),
}

impl PlatformIp {
    /// `None` selects the peer address. An invalid header name also falls back
    /// to it; config validation rejects those before they get here.
    pub fn from_config(header: Option<&str>) -> Self {
        match header.map(|name| HeaderName::from_bytes(name.trim().as_bytes())) {
            Some(Ok(name)) => Self::Header(name),
            Some(Err(_)) => {
                tracing::warn!(header = ?header, "Invalid client IP header, using peer address");
                Self::Peer
            }
            None => Self::Peer,
        }
    }

    /// The platform address for a request whose TCP peer is `peer`.
    /// Header values that are not an IP address count as absent.
    pub fn lookup(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> Option<IpAddr> {
        match self {
            Self::Peer => peer,
            Self::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok()),
        }
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
}
