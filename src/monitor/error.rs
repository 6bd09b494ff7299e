//! Error kinds raised at the monitoring boundaries
//!
//! Each kind maps to one recovery policy: probe errors back off and retry,
//! insufficient data falls back to an identity forecast, fit errors keep the
//! previous model. None of them is fatal to a monitor loop.

use std::fmt;

/// A probe produced no measurement
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Host answered nothing (or ping exited unsuccessfully)
    Unreachable(String),
    /// Probe did not finish within its deadline
    Timeout { address: String, timeout_ms: u64 },
    /// The probe command could not be started
    Spawn(String),
    /// Probe ran but its output carried no latency
    Parse(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(addr) => write!(f, "{} is unreachable", addr),
            Self::Timeout { address, timeout_ms } => {
                write!(f, "probe to {} timed out after {}ms", address, timeout_ms)
            }
            Self::Spawn(reason) => write!(f, "failed to start probe: {}", reason),
            Self::Parse(addr) => write!(f, "no latency found in probe output for {}", addr),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Regression fit failures
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    EmptyMatrix,
    DimensionMismatch { rows: usize, targets: usize },
    NonFinite,
    Singular,
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMatrix => write!(f, "training matrix is empty"),
            Self::DimensionMismatch { rows, targets } => {
                write!(f, "{} feature rows but {} targets", rows, targets)
            }
            Self::NonFinite => write!(f, "training data contains non-finite values"),
            Self::Singular => write!(f, "normal equations are singular"),
        }
    }
}

impl std::error::Error for FitError {}

/// Why a retrain did not happen
#[derive(Debug, Clone, PartialEq)]
pub enum PredictorError {
    InsufficientData { have: usize, need: usize },
    NoFeatures,
    Fit(FitError),
}

impl fmt::Display for PredictorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData { have, need } => {
                write!(f, "insufficient data: {} samples, need {}", have, need)
            }
            Self::NoFeatures => write!(f, "no feature rows could be derived"),
            Self::Fit(e) => write!(f, "model fit failed: {}", e),
        }
    }
}

impl std::error::Error for PredictorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FitError> for PredictorError {
    fn from(e: FitError) -> Self {
        Self::Fit(e)
    }
}
