//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the gated routes
//! - Layer rate limiting and CSRF checks per route group
//! - Wire up middleware (tracing, request ID, timeout, body limit, metrics)
//! - Apply rate-limit policy updates from the config watcher
//! - Close limiter stores on shutdown

use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GateConfig, RateLimitPolicy};
use crate::http::handlers::{accepted_handler, health_handler};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::observability::metrics;
use crate::security::client_id::PlatformIp;
use crate::security::csrf::{csrf_middleware, csrf_token_handler, CsrfGuard};
use crate::security::rate_limit::{rate_limit_middleware, Clock, RateLimitStore, RateLimiter, SystemClock};

/// Gates shared by every route.
#[derive(Clone)]
pub struct GateState {
    pub csrf: Arc<CsrfGuard>,
    pub auth_limiter: Arc<RateLimiter>,
    pub api_limiter: Arc<RateLimiter>,
}

impl GateState {
    fn new(config: &GateConfig, clock: Arc<dyn Clock>) -> Self {
        let sweep_interval = Duration::from_secs(config.rate_limit.sweep_interval_secs);
        let platform_ip = PlatformIp::from_config(config.rate_limit.client_ip_header.as_deref());
        let limiter = |name: &'static str, policy: &RateLimitPolicy| {
            let store = if config.rate_limit.enabled {
                RateLimitStore::open(name, clock.clone(), sweep_interval)
            } else {
                Arc::new(RateLimitStore::new(name, clock.clone()))
            };
            Arc::new(RateLimiter::new(name, policy.clone(), store).with_platform_ip(platform_ip.clone()))
        };

        Self {
            csrf: Arc::new(CsrfGuard::new(&config.csrf, config.environment)),
            auth_limiter: limiter("auth", &config.rate_limit.auth),
            api_limiter: limiter("api", &config.rate_limit.api),
        }
    }

    /// Swap in the rate-limit policies of a reloaded config.
    pub fn apply_config(&self, config: &GateConfig) {
        self.auth_limiter.update_policy(config.rate_limit.auth.clone());
        self.api_limiter.update_policy(config.rate_limit.api.clone());
    }

    async fn close(&self) {
        self.auth_limiter.store().close().await;
        self.api_limiter.store().close().await;
    }
}

/// HTTP server for the request gate.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
    state: GateState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Must be called from within a tokio runtime when rate limiting is enabled.
    pub fn new(config: GateConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`HttpServer::new`] with an explicit clock for the rate limiters.
    pub fn with_clock(config: GateConfig, clock: Arc<dyn Clock>) -> Self {
        let state = GateState::new(&config, clock);
        let router = Self::build_router(&config, &state);
        Self { router, config, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GateConfig, state: &GateState) -> Router {
        let mut token = Router::new()
            .route("/csrf-token", get(csrf_token_handler))
            .with_state(state.csrf.clone());
        let mut auth = Router::new()
            .route("/auth/{*action}", any(accepted_handler))
            .route_layer(middleware::from_fn_with_state(state.csrf.clone(), csrf_middleware));
        let mut api = Router::new()
            .route("/api/{*resource}", any(accepted_handler))
            .route_layer(middleware::from_fn_with_state(state.csrf.clone(), csrf_middleware));

        // Added after the CSRF layer so the limiter runs first.
        if config.rate_limit.enabled {
            token = token.route_layer(middleware::from_fn_with_state(
                state.api_limiter.clone(),
                rate_limit_middleware,
            ));
            auth = auth.route_layer(middleware::from_fn_with_state(
                state.auth_limiter.clone(),
                rate_limit_middleware,
            ));
            api = api.route_layer(middleware::from_fn_with_state(
                state.api_limiter.clone(),
                rate_limit_middleware,
            ));
        }

        Router::new()
            .route("/health", get(health_handler))
            .merge(token)
            .merge(auth)
            .merge(api)
            .layer(middleware::from_fn(track_requests))
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// The assembled router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain and close the limiter stores.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GateConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = ?self.config.environment,
            rate_limit_enabled = self.config.rate_limit.enabled,
            client_ip_header = ?self.config.rate_limit.client_ip_header,
            "HTTP server starting"
        );

        let reload_state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                reload_state.apply_config(&new_config);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        reloader.abort();
        self.state.close().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
