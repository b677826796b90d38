//! Turnstile - Per-Key Fixed-Window Rate Limiting
//!
//! This crate implements an in-process admission check: each caller key gets
//! a counter that admits a fixed number of requests per window. It ships an
//! axum middleware and a small HTTP check service around the limiter.
//! Limits are enforced per process and are not coordinated across instances.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
