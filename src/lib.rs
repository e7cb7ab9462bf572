//! Turnstile - Per-Client Admission Control
//!
//! This crate implements a token bucket rate limiter that sits in front of an
//! HTTP service. Every client gets its own bucket in a shared visitor
//! registry, and a background sweeper periodically clears the registry to
//! bound memory.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
