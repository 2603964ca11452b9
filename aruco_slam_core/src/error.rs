// aruco_slam_core/src/error.rs

use crate::types::MarkerId;
use thiserror::Error;

/// Fatal construction-time failures.
///
/// Everything that can go wrong once frames are flowing (duplicate detections,
/// singular innovation covariance, oversized attitude corrections, deferred
/// admissions) is recovered locally and logged instead; see the filter
/// implementations.
#[derive(Debug, Error)]
pub enum SlamError {
    #[error("motion-model window must be at least 1 frame")]
    InvalidWindow,

    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidNoise { name: &'static str, value: f64 },

    #[error("measurement noise variance must be strictly positive, got {0}")]
    NonPositiveMeasurementNoise(f64),

    #[error("landmark initial uncertainty must be finite and positive, got {0}")]
    InvalidLandmarkUncertainty(f64),

    #[error("marker {0} is already admitted to the state")]
    AlreadyAdmitted(MarkerId),

    #[error("prior map entry for marker {0} contains non-finite values")]
    InvalidMapEntry(MarkerId),
}
