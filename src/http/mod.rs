//! HTTP surface: admission middleware, CORS, security headers and the server.

mod admission;
mod cors;
mod headers;
mod server;

pub use admission::{enforce, AdmissionControl, ClientResolver, Outcome, Rejection};
pub use cors::cors_layer;
pub use headers::security_headers;
pub use server::{protect, router, HttpServer};
