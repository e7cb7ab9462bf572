//! Rate limiting logic and state management.

mod bucket;
mod client;
mod registry;
mod sweeper;

pub use bucket::{Admission, TokenBucket};
pub use client::ClientId;
pub use registry::{LimitConfig, VisitorRegistry};
pub use sweeper::Sweeper;
