// aruco_slam_core/src/estimation/mod.rs

//! The filter contract and the pieces both variants share: detection
//! sanitization, the stacked measurement noise, the batched Kalman
//! correction, and prior-map seeding.

use crate::config::{LandmarkInit, SlamConfig};
use crate::error::SlamError;
use crate::map::{LandmarkEntry, LandmarkMap};
use crate::state::FilterState;
use crate::types::{Detection, MarkerId};
use dyn_clone::DynClone;
use log::warn;
use nalgebra::{Cholesky, DMatrix, DVector, Matrix3, UnitQuaternion, Vector3};
use std::collections::{BTreeMap, HashSet};

pub mod filters;

/// Variance given to a prior-map landmark whose entry carries no covariance.
/// Matches the conservative fixed-initialization default.
const PRIOR_MAP_UNCERTAINTY: f64 = 0.7;

/// What happened during one frame. Every recoverable condition the frame hit
/// is visible here as well as in the log.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// Markers admitted to the state this frame, in detection order.
    pub admitted: Vec<MarkerId>,
    /// First-time markers whose admission was deferred (camera state not
    /// usable this frame).
    pub deferred: Vec<MarkerId>,
    /// Detections dropped as malformed: intra-frame duplicates (the first
    /// occurrence wins) or non-finite positions.
    pub dropped: usize,
    /// False when the correction was skipped (no usable detections, or a
    /// singular innovation covariance); the prediction-only state stands.
    pub corrected: bool,
}

/// The contract for any algorithm performing the marker-SLAM estimator role.
///
/// The variant (multiplicative or additive) is chosen once, at construction,
/// via [`SlamConfig::variant`]; afterwards callers only see this trait. One
/// frame is `predict()` followed by `update(detections)`; `process_frame`
/// bundles the two so no partially-applied frame is observable. The filter
/// exclusively owns its state; external code reads snapshots between frames.
pub trait SlamFilter: DynClone + Send {
    /// Advances the camera prior using the motion model and inflates the
    /// covariance by process noise. Landmarks are untouched (static world).
    fn predict(&mut self);

    /// Admits first-time markers, then corrects the full state from all of
    /// the frame's detections as a single batched update.
    fn update(&mut self, detections: &[Detection]) -> FrameReport;

    /// One atomic frame: predict, admit, batched correct.
    fn process_frame(&mut self, detections: &[Detection]) -> FrameReport {
        self.predict();
        self.update(detections)
    }

    /// The current nominal camera orientation (unit quaternion).
    fn camera_orientation(&self) -> UnitQuaternion<f64>;

    fn state(&self) -> &FilterState;

    fn state_mut(&mut self) -> &mut FilterState;

    fn config(&self) -> &SlamConfig;

    /// The current camera translation in the map frame.
    fn camera_translation(&self) -> Vector3<f64> {
        self.state().translation()
    }

    /// Identifier -> map-frame position for every admitted landmark.
    fn landmarks(&self) -> BTreeMap<MarkerId, Vector3<f64>> {
        let state = self.state();
        state
            .marker_ids()
            .iter()
            .enumerate()
            .map(|(slot, id)| (*id, state.landmark_position(slot)))
            .collect()
    }

    /// Identifier -> per-axis position variance for every admitted landmark.
    fn landmark_variances(&self) -> BTreeMap<MarkerId, Vector3<f64>> {
        let state = self.state();
        state
            .marker_ids()
            .iter()
            .enumerate()
            .map(|(slot, id)| (*id, state.landmark_variance(slot)))
            .collect()
    }

    /// Exports the landmark map in the persistence shape. Round-tripping that
    /// shape back through [`build_filter_with_map`] reproduces identifiers and
    /// positions within floating tolerance.
    fn export_map(&self) -> LandmarkMap {
        let state = self.state();
        let mut map = LandmarkMap {
            entries: state
                .marker_ids()
                .iter()
                .enumerate()
                .map(|(slot, id)| LandmarkEntry {
                    id: *id,
                    position: state.landmark_position(slot),
                    covariance: Some(state.landmark_covariance(slot)),
                })
                .collect(),
        };
        map.sort_by_id();
        map
    }

    /// Seeds the state from a previously exported map. Intended before the
    /// first frame; entries without a covariance get a conservative diagonal.
    fn restore_map(&mut self, map: &LandmarkMap) -> Result<(), SlamError> {
        let fallback = match self.config().landmark_init {
            LandmarkInit::Fixed { uncertainty } => uncertainty,
            LandmarkInit::Propagated => PRIOR_MAP_UNCERTAINTY,
        };
        for entry in &map.entries {
            if !entry.is_finite() {
                return Err(SlamError::InvalidMapEntry(entry.id));
            }
            let block = entry
                .covariance
                .unwrap_or_else(|| Matrix3::identity() * fallback);
            self.state_mut()
                .admit(entry.id, &entry.position, &block, None)?;
        }
        Ok(())
    }
}

dyn_clone::clone_trait_object!(SlamFilter);

/// Builds the filter variant named by the configuration. Fails fast on a
/// malformed configuration, before any frame is processed.
pub fn build_filter(config: SlamConfig) -> Result<Box<dyn SlamFilter>, SlamError> {
    use crate::config::FilterVariant;
    Ok(match config.variant {
        FilterVariant::Mekf => Box::new(filters::MultiplicativeEkf::new(config)?),
        FilterVariant::Additive => Box::new(filters::AdditiveEkf::new(config)?),
    })
}

/// Builds a filter whose initial landmark state comes from a saved map.
pub fn build_filter_with_map(
    config: SlamConfig,
    map: &LandmarkMap,
) -> Result<Box<dyn SlamFilter>, SlamError> {
    let mut filter = build_filter(config)?;
    filter.restore_map(map)?;
    Ok(filter)
}

// --- Shared per-frame machinery ---

/// Drops malformed detections: intra-frame duplicates (deterministically, the
/// first occurrence wins) and non-finite positions. Returns the kept
/// detections in input order and the dropped count.
pub(crate) fn sanitize_detections(detections: &[Detection]) -> (Vec<Detection>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(detections.len());
    let mut dropped = 0;
    for detection in detections {
        if !detection.is_finite() {
            warn!(
                "dropping detection of marker {}: non-finite position",
                detection.id
            );
            dropped += 1;
        } else if !seen.insert(detection.id) {
            warn!(
                "duplicate detection of marker {} within one frame; keeping the first",
                detection.id
            );
            dropped += 1;
        } else {
            kept.push(*detection);
        }
    }
    (kept, dropped)
}

/// The block-diagonal measurement noise `R` for one frame's stacked update,
/// one 3x3 block per observed marker.
pub(crate) fn stacked_noise(config: &SlamConfig, ids: &[MarkerId]) -> DMatrix<f64> {
    let dim = 3 * ids.len();
    let mut noise = DMatrix::zeros(dim, dim);
    for (i, id) in ids.iter().enumerate() {
        noise
            .fixed_view_mut::<3, 3>(3 * i, 3 * i)
            .copy_from(&config.measurement_noise_block(*id));
    }
    noise
}

/// The batched Kalman correction, shared by both variants.
///
/// Computes `K = P H^T (H P H^T + R)^-1` and returns the error-state
/// correction `K y`, updating the covariance in Joseph form
/// `(I - KH) P (I - KH)^T + K R K^T` and re-symmetrizing. Returns `None`
/// without touching the state when the innovation covariance has no Cholesky
/// factor (singular or indefinite): the caller keeps the prediction-only
/// state for the frame rather than applying a partially computed correction.
pub(crate) fn kalman_correct(
    state: &mut FilterState,
    jacobian: &DMatrix<f64>,
    innovation: &DVector<f64>,
    noise: &DMatrix<f64>,
) -> Option<DVector<f64>> {
    let covariance = &state.covariance;
    let s = jacobian * covariance * jacobian.transpose() + noise;
    let cholesky = Cholesky::new(s)?;
    let gain = covariance * jacobian.transpose() * cholesky.inverse();
    let delta = &gain * innovation;

    let dim = state.dim();
    let identity = DMatrix::identity(dim, dim);
    let i_kh = identity - &gain * jacobian;
    state.covariance = &i_kh * &state.covariance * i_kh.transpose()
        + &gain * noise * gain.transpose();
    state.symmetrize();

    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn duplicate_detections_keep_the_first_occurrence() {
        let detections = vec![
            Detection::new(1, Vector3::new(1.0, 0.0, 0.0)),
            Detection::new(2, Vector3::new(0.0, 1.0, 0.0)),
            Detection::new(1, Vector3::new(9.0, 9.0, 9.0)),
        ];
        let (kept, dropped) = sanitize_detections(&detections);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
        assert_eq!(kept[0].id, MarkerId(1));
        assert_eq!(kept[0].position, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(kept[1].id, MarkerId(2));
    }

    #[test]
    fn non_finite_detections_are_dropped() {
        let detections = vec![Detection::new(3, Vector3::new(f64::NAN, 0.0, 0.0))];
        let (kept, dropped) = sanitize_detections(&detections);
        assert!(kept.is_empty());
        assert_eq!(dropped, 1);
    }

    #[test]
    fn stacked_noise_is_block_diagonal() {
        let mut config = SlamConfig::default();
        config.measurement_noise_overrides.insert(2, [0.1, 0.1, 0.1]);
        let noise = stacked_noise(&config, &[MarkerId(1), MarkerId(2)]);
        assert_eq!(noise.nrows(), 6);
        assert_eq!(noise[(0, 0)], config.measurement_noise);
        assert_eq!(noise[(3, 3)], 0.1);
        assert_eq!(noise[(0, 3)], 0.0);
    }

    #[test]
    fn singular_innovation_covariance_skips_the_correction() {
        // Zero prior and zero noise make S exactly singular; the correction
        // must be refused and the state left untouched.
        let mut state = FilterState::new(9, DMatrix::zeros(9, 9));
        let jacobian = DMatrix::zeros(3, 9);
        let innovation = DVector::zeros(3);
        let noise = DMatrix::zeros(3, 3);

        let before = state.covariance.clone();
        let result = kalman_correct(&mut state, &jacobian, &innovation, &noise);
        assert!(result.is_none());
        assert_eq!(state.covariance, before);
    }

    #[test]
    fn well_posed_correction_shrinks_uncertainty() {
        let mut state = FilterState::new(3, DMatrix::identity(3, 3));
        let jacobian = DMatrix::identity(3, 3);
        let innovation = DVector::from_row_slice(&[0.5, 0.0, 0.0]);
        let noise = DMatrix::identity(3, 3);

        let delta = kalman_correct(&mut state, &jacobian, &innovation, &noise).unwrap();
        // K = P (P + R)^-1 = 0.5 I, so the correction is half the innovation
        // and the posterior variance is halved.
        assert!((delta[0] - 0.25).abs() < 1e-12);
        assert!((state.covariance[(0, 0)] - 0.5).abs() < 1e-12);
        assert!((state.covariance[(1, 1)] - 0.5).abs() < 1e-12);
    }
}
