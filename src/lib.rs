//! Gatehouse - Round-robin Reverse Proxy
//!
//! Core library for HTTP handling, per-client rate limiting and request forwarding.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
