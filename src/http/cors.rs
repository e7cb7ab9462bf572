//! CORS layer built from configuration.

use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::error::Result;

/// Build the CORS layer for the configured origins.
///
/// Preflight requests are answered by this layer before admission control
/// runs, so they never spend a client's tokens.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer> {
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(config.origins()?))
        .allow_methods(config.methods()?)
        .allow_headers(config.headers()?)
        .expose_headers(config.exposed()?)
        .allow_credentials(config.allow_credentials)
        .max_age(config.max_age()))
}
