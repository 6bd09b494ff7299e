//! Adaptive Latency Monitor
//!
//! Measures round-trip latency to a set of endpoints, forecasts the next
//! sample per endpoint with a periodically refit model, flags spikes against
//! the forecast and, on a spike, looks for a faster server among the
//! endpoint's resolved addresses.
//!
//! Layout:
//! - [`features`], [`regression`], [`predictor`]: the per-endpoint model
//! - [`classifier`]: pluggable spike rules
//! - [`probe`], [`reroute`]: network collaborators and server selection
//! - [`worker`], [`supervisor`]: one loop per endpoint under a supervisor
//! - [`status`], [`journal`], [`metrics`]: reporting
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use latency_watch::monitor::{MonitorConfig, PingProbe, Supervisor, SystemResolver};
//!
//! let config = MonitorConfig::from_env();
//! let supervisor = Supervisor::new(
//!     config.clone(),
//!     Arc::new(PingProbe::new(config.probe.clone())),
//!     Arc::new(SystemResolver),
//! );
//! supervisor.add("example.com");
//! supervisor.start().await;
//!
//! let mut updates = supervisor.subscribe();
//! while let Ok(update) = updates.recv().await {
//!     if update.is_spike {
//!         // update.suggested_server may name a faster address
//!     }
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod journal;
pub mod metrics;
pub mod predictor;
pub mod probe;
pub mod regression;
pub mod reroute;
pub mod sample;
pub mod status;
pub mod supervisor;
pub mod worker;

pub use classifier::*;
pub use config::*;
pub use error::*;
pub use features::{FeatureExtractor, FeatureMatrix, FeatureRow, FEATURE_COUNT, FEATURE_NAMES};
pub use journal::*;
pub use metrics::*;
pub use predictor::*;
pub use probe::*;
pub use regression::*;
pub use reroute::*;
pub use sample::*;
pub use status::*;
pub use supervisor::*;
pub use worker::*;
