//! HTTP server implementation.

use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::admission::{enforce, AdmissionControl};
use super::headers::security_headers;
use crate::error::{Result, TurnstileError};

/// Put `routes` behind CORS, the security headers and admission control.
///
/// Layers run outermost first: CORS, then security headers, then admission.
/// Security headers wrap the admission layer so rejections carry them too.
pub fn protect(routes: Router, control: AdmissionControl, cors: CorsLayer) -> Router {
    routes
        .layer(middleware::from_fn_with_state(control, enforce))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
}

/// The service's own routes, protected by admission control.
pub fn router(control: AdmissionControl, cors: CorsLayer) -> Router {
    protect(Router::new().route("/ping", get(ping)), control, cors)
}

/// Health check endpoint
async fn ping() -> &'static str {
    "pong-pong"
}

/// HTTP server fronted by per-client admission control.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve, already protected
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server serving the default routes.
    pub fn new(addr: SocketAddr, control: AdmissionControl, cors: CorsLayer) -> Self {
        Self {
            addr,
            router: router(control, cors),
        }
    }

    /// Create a new HTTP server with a custom router.
    ///
    /// The router should already have been passed through [`protect`].
    pub fn with_router(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            TurnstileError::Io(e)
        })?;

        Self::serve_listener(listener, self.router, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(listener: TcpListener, router: Router, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(
            addr = ?listener.local_addr().ok(),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}
