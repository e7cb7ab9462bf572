//! Admission middleware placed in front of protected routes.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

use crate::config::RateLimitingConfig;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Admission, ClientId, VisitorRegistry};

/// Resolves the client identifier for a request.
#[derive(Debug, Clone)]
pub struct ClientResolver {
    /// Header to read the forwarded address from, when trusted
    proxy_header: Option<HeaderName>,
    /// Peers allowed to set the header; empty means any peer
    trusted_proxies: Vec<IpAddr>,
}

impl ClientResolver {
    /// Resolve clients by peer address only.
    pub fn peer_only() -> Self {
        Self {
            proxy_header: None,
            trusted_proxies: Vec::new(),
        }
    }

    /// Build a resolver from the rate limiting configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        if !config.trust_proxy_header {
            return Ok(Self::peer_only());
        }

        let header = HeaderName::from_bytes(config.proxy_header.trim().as_bytes())
            .map_err(|e| {
                TurnstileError::Config(format!(
                    "invalid proxy_header {:?}: {}",
                    config.proxy_header, e
                ))
            })?;

        Ok(Self {
            proxy_header: Some(header),
            trusted_proxies: config.trusted_proxies.clone(),
        })
    }

    /// Pick the identifier for a request from its peer address and headers.
    ///
    /// The forwarding header is honored only when enabled and sent by a
    /// trusted peer. With a trusted proxy list the header is walked from the
    /// right and the first address that is not a trusted proxy wins, so a
    /// client cannot pick its own identity by prepending entries. Without a
    /// list the first (client-most) address is used. An unparsable entry
    /// falls back to the peer address.
    pub fn resolve(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> ClientId {
        if let Some(forwarded) = self.forwarded_addr(peer, headers) {
            return ClientId::from(forwarded);
        }

        match peer {
            Some(addr) => ClientId::from(addr),
            None => ClientId::unknown(),
        }
    }

    fn forwarded_addr(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> Option<IpAddr> {
        let header = self.proxy_header.as_ref()?;

        let value = headers.get(header)?.to_str().ok()?;

        if self.trusted_proxies.is_empty() {
            return value.split(',').next()?.trim().parse().ok();
        }

        if !self.is_trusted(peer?) {
            return None;
        }

        let mut hops = value.rsplit(',').map(str::trim).peekable();
        while let Some(hop) = hops.next() {
            let addr: IpAddr = hop.parse().ok()?;
            if hops.peek().is_none() || !self.is_trusted(addr) {
                return Some(addr);
            }
        }
        None
    }

    fn is_trusted(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.trusted_proxies
            .iter()
            .any(|proxy| proxy.to_canonical() == addr)
    }
}

impl Default for ClientResolver {
    fn default() -> Self {
        Self::peer_only()
    }
}

/// Outcome of running a request through admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Pass the request to the next stage
    Continue,
    /// Short-circuit with a rejection
    Reject(Rejection),
}

/// A rate-limit rejection for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    client: ClientId,
}

impl Rejection {
    /// The client that was rejected.
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        StatusCode::TOO_MANY_REQUESTS
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "error": "rate limit exceeded" })),
        )
            .into_response()
    }
}

/// Per-client admission control shared by every request handler.
#[derive(Clone)]
pub struct AdmissionControl {
    registry: Arc<VisitorRegistry>,
    resolver: Arc<ClientResolver>,
}

impl AdmissionControl {
    /// Create admission control over a shared registry.
    pub fn new(registry: Arc<VisitorRegistry>, resolver: ClientResolver) -> Self {
        Self {
            registry,
            resolver: Arc::new(resolver),
        }
    }

    /// The registry backing this admission control.
    pub fn registry(&self) -> &Arc<VisitorRegistry> {
        &self.registry
    }

    /// Identify the client behind `request` and spend one of its tokens.
    ///
    /// Never blocks or retries; a denial is final for this request.
    pub fn admit<B>(&self, request: &axum::http::Request<B>) -> Outcome {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client = self.resolver.resolve(peer, request.headers());

        match self.registry.check(&client) {
            Admission::Admit => Outcome::Continue,
            Admission::Deny => {
                debug!(
                    client = %client,
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Rate limit exceeded"
                );
                Outcome::Reject(Rejection { client })
            }
        }
    }
}

/// Middleware function enforcing admission control.
///
/// Install with `axum::middleware::from_fn_with_state`.
pub async fn enforce(
    State(control): State<AdmissionControl>,
    request: Request,
    next: Next,
) -> Response {
    match control.admit(&request) {
        Outcome::Continue => next.run(request).await,
        Outcome::Reject(rejection) => rejection.into_response(),
    }
}
