// aruco_slam_core/src/map.rs

//! The persistence boundary for landmark maps.
//!
//! The filter can be seeded with a previously saved map and can export its
//! current landmark estimates in the same shape; the on-disk format is the
//! caller's choice (anything serde speaks).

use crate::types::MarkerId;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// One saved landmark: identifier, map-frame position, and optionally the
/// 3x3 position covariance block it had when exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkEntry {
    pub id: MarkerId,
    pub position: Vector3<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<Matrix3<f64>>,
}

impl LandmarkEntry {
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self
                .covariance
                .map_or(true, |c| c.iter().all(|v| v.is_finite()))
    }
}

/// An identifier -> position[, covariance] map, ordered by identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkMap {
    pub entries: Vec<LandmarkEntry>,
}

impl LandmarkMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sort_by_id(&mut self) {
        self.entries.sort_by_key(|e| e.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn map_round_trips_through_json() {
        let map = LandmarkMap {
            entries: vec![
                LandmarkEntry {
                    id: MarkerId(3),
                    position: Vector3::new(1.0, -2.0, 0.5),
                    covariance: Some(Matrix3::identity() * 0.7),
                },
                LandmarkEntry {
                    id: MarkerId(11),
                    position: Vector3::new(0.25, 0.0, 4.0),
                    covariance: None,
                },
            ],
        };

        let json = serde_json::to_string(&map).unwrap();
        let back: LandmarkMap = serde_json::from_str(&json).unwrap();

        assert_eq!(back.len(), 2);
        for (a, b) in map.entries.iter().zip(back.entries.iter()) {
            assert_eq!(a.id, b.id);
            assert_abs_diff_eq!(a.position, b.position, epsilon = 1e-12);
            assert_eq!(a.covariance.is_some(), b.covariance.is_some());
        }
    }

    #[test]
    fn non_finite_entries_are_detected() {
        let entry = LandmarkEntry {
            id: MarkerId(1),
            position: Vector3::new(f64::NAN, 0.0, 0.0),
            covariance: None,
        };
        assert!(!entry.is_finite());
    }
}
