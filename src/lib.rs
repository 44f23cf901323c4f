//! Turnstile - Fixed-Window Request Throttling
//!
//! This crate implements a request-throttling decision layer for HTTP
//! services. Each request is attributed to a subject, counted in a
//! fixed time window held by a pluggable counter store, and admitted or
//! rejected against a configured quota. When the counter store is
//! unreachable, requests are let through rather than refused.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod server;
pub mod store;
