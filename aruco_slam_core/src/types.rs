// aruco_slam_core/src/types.rs

use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Core Type Aliases ---
pub type StateVector = DVector<f64>;
pub type CovarianceMatrix = DMatrix<f64>;

// --- Core Identifier ---
// The identifier the upstream detector assigns to a fiducial marker.
// Unique per marker, never reused within a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MarkerId(pub u32);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single marker observation produced by the external detector for one frame:
/// the marker's identifier and its position expressed in the camera frame.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub id: MarkerId,
    pub position: Vector3<f64>,
}

impl Detection {
    pub fn new(id: u32, position: Vector3<f64>) -> Self {
        Self {
            id: MarkerId(id),
            position,
        }
    }

    /// A detection with any non-finite component cannot be fused.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
    }
}
