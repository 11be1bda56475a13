//! CSRF protection with double-submit cookie tokens.
//!
//! A state-changing request passes when the token in the `x-csrf-token`
//! header equals the token in the `feedvote-csrf-token` cookie. A cross-site
//! attacker can make the browser send the cookie but cannot read it, so it
//! cannot produce the matching header.
//!
//! Every accepted state-changing request rotates the token. The new value is
//! set in the cookie and echoed in the response's token header.
//!
//! Known gap: a state-changing request that arrives with no token cookie at all
//! is let through and handed a fresh token. A user's very first write on a
//! new session is therefore not protected.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::config::{CsrfConfig, Environment};
use crate::http::request::request_id_of;
use crate::observability::metrics;
use crate::security::error::GateError;

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// A freshly minted token and the cookie that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    pub set_cookie: String,
}

impl IssuedToken {
    /// Append the `Set-Cookie` header and echo the token under `header_name`.
    pub fn attach(&self, headers: &mut HeaderMap, header_name: &str) {
        match HeaderValue::from_str(&self.set_cookie) {
            Ok(cookie) => {
                headers.append(header::SET_COOKIE, cookie);
            }
            Err(e) => {
                tracing::error!(error = %e, "CSRF cookie is not a valid header value");
                return;
            }
        }
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::from_bytes(header_name.as_bytes()),
            HeaderValue::from_str(&self.value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfOutcome {
    /// Safe method, nothing checked.
    Exempt,
    /// No token cookie yet. Allowed, with a first token.
    FirstContact(IssuedToken),
    /// Header matched the cookie. Allowed, with a rotated token.
    Verified(IssuedToken),
}

#[derive(Debug, Clone)]
pub struct CsrfGuard {
    cookie_name: String,
    header_name: String,
    ttl_secs: u64,
    secure: bool,
}

impl CsrfGuard {
    /// The `Secure` flag follows `config.secure` when set, otherwise it is on
    /// only in production.
    pub fn new(config: &CsrfConfig, environment: Environment) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            header_name: config.header_name.to_ascii_lowercase(),
            ttl_secs: config.ttl_secs,
            secure: config.secure.unwrap_or(environment.is_production()),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn is_safe_method(method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// Mint a new token and the cookie that stores it.
    pub fn issue_token(&self) -> IssuedToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);
        let set_cookie = self.cookie_for(&value);
        IssuedToken { value, set_cookie }
    }

    fn cookie_for(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            self.cookie_name, token, self.ttl_secs
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// The token cookie sent with the request. Empty values count as absent.
    pub fn cookie_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// The token submitted in the request header.
    pub fn header_token<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    }

    pub fn validate(&self, method: &Method, headers: &HeaderMap) -> Result<CsrfOutcome, GateError> {
        if Self::is_safe_method(method) {
            return Ok(CsrfOutcome::Exempt);
        }

        let Some(cookie_token) = self.cookie_token(headers) else {
            return Ok(CsrfOutcome::FirstContact(self.issue_token()));
        };

        match self.header_token(headers) {
            Some(submitted) if submitted == cookie_token => Ok(CsrfOutcome::Verified(self.issue_token())),
            _ => Err(GateError::InvalidToken),
        }
    }
}

/// Middleware enforcing the double-submit check.
///
/// Safe requests that carry no token cookie are given one on the way out.
pub async fn csrf_middleware(
    State(guard): State<Arc<CsrfGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let outcome = match guard.validate(request.method(), request.headers()) {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(
                request_id = %request_id_of(&request),
                method = %request.method(),
                path = %request.uri().path(),
                header_present = guard.header_token(request.headers()).is_some(),
                "CSRF token rejected"
            );
            metrics::record_csrf_rejection();
            return err.into_response();
        }
    };

    let issued = match outcome {
        CsrfOutcome::Exempt if guard.cookie_token(request.headers()).is_none() => {
            Some((guard.issue_token(), "safe_request"))
        }
        CsrfOutcome::Exempt => None,
        CsrfOutcome::FirstContact(token) => {
            tracing::debug!(path = %request.uri().path(), "No CSRF cookie on state-changing request, issuing one");
            Some((token, "first_contact"))
        }
        CsrfOutcome::Verified(token) => Some((token, "rotation")),
    };

    let mut response = next.run(request).await;
    if let Some((token, reason)) = issued {
        token.attach(response.headers_mut(), guard.header_name());
        metrics::record_csrf_issued(reason);
    }
    response
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenBody {
    pub csrf_token: String,
}

/// `GET /csrf-token`: issue a token in both the cookie and the body.
pub async fn csrf_token_handler(State(guard): State<Arc<CsrfGuard>>) -> Response {
    let token = guard.issue_token();
    metrics::record_csrf_issued("endpoint");

    let mut response = Json(CsrfTokenBody { csrf_token: token.value.clone() }).into_response();
    token.attach(response.headers_mut(), guard.header_name());
    response
}
