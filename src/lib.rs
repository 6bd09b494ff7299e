//! Latency Watch Library
//!
//! Adaptive per-endpoint latency monitoring with spike detection and
//! reroute suggestions. Used by the `latency-watch` binary and tests.

pub mod api;
pub mod monitor;
