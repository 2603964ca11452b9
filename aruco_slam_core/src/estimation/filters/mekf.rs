// aruco_slam_core/src/estimation/filters/mekf.rs

//! The error-state (multiplicative) EKF, the primary filter variant.
//!
//! Orientation lives as a nominal unit quaternion held outside the covariance;
//! the state vector carries a 3-parameter attitude error that is zero at the
//! start and end of every update cycle and only transiently non-zero during
//! linearization. Corrections are applied by composing a small-angle
//! quaternion onto the nominal value and resetting the error to zero. This
//! compose-then-reset sequence is what distinguishes the filter from the
//! additive variant.

use crate::config::{LandmarkInit, SlamConfig};
use crate::error::SlamError;
use crate::estimation::filters::ATTITUDE_CLIP;
use crate::estimation::{
    kalman_correct, sanitize_detections, stacked_noise, FrameReport, SlamFilter,
};
use crate::measurement;
use crate::motion::MovingAverageModel;
use crate::state::FilterState;
use crate::types::Detection;
use log::warn;
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion};

/// Camera block width: translation (0..3), attitude error (3..6), and a
/// 3-wide virtual slot (6..9) standing in for the out-of-band nominal
/// quaternion. The virtual slot keeps the layout aligned with the upstream
/// 10-number trajectory convention; it carries zero mean, zero process noise,
/// and zero measurement-Jacobian columns, so it never couples into the
/// estimate.
pub const CAM_DIMS: usize = 9;

const TRANSLATION: std::ops::Range<usize> = 0..3;
const ATTITUDE: std::ops::Range<usize> = 3..6;

#[derive(Debug, Clone)]
pub struct MultiplicativeEkf {
    config: SlamConfig,
    state: FilterState,
    /// Nominal orientation, never placed in the covariance.
    orientation: UnitQuaternion<f64>,
    motion: MovingAverageModel,
}

impl MultiplicativeEkf {
    /// Validates the configuration and builds the filter at the identity
    /// prior pose.
    pub fn new(config: SlamConfig) -> Result<Self, SlamError> {
        config.validate()?;
        let initial_covariance =
            DMatrix::identity(CAM_DIMS, CAM_DIMS) * config.initial_camera_uncertainty;
        let state = FilterState::new(CAM_DIMS, initial_covariance);
        let mut motion = MovingAverageModel::new(config.window);
        motion.record(state.translation());
        Ok(Self {
            config,
            state,
            orientation: UnitQuaternion::identity(),
            motion,
        })
    }

    /// Initializes a first-time marker: mean at `p + R(q) z`, covariance per
    /// the configured strategy.
    fn admit_landmark(&mut self, detection: &Detection) -> Result<usize, SlamError> {
        let camera = self.state.translation();
        let rotated = self.orientation.transform_vector(&detection.position);
        let position = camera + rotated;
        let noise = self.config.measurement_noise_block(detection.id);

        let (block, cross) = match self.config.landmark_init {
            LandmarkInit::Fixed { uncertainty } => (Matrix3::identity() * uncertainty, None),
            LandmarkInit::Propagated => {
                // First-order propagation through l = p + R(dq ⊗ q) z:
                // A = [ I | -skew(R z) | 0 | 0 ... ] over the full state.
                let dim = self.state.dim();
                let mut init_jacobian = DMatrix::zeros(3, dim);
                init_jacobian
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&Matrix3::identity());
                init_jacobian
                    .fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&(-rotated.cross_matrix()));

                let cross = &init_jacobian * &self.state.covariance;
                let propagated = (&cross * init_jacobian.transpose())
                    .fixed_view::<3, 3>(0, 0)
                    .into_owned();
                let rotation = *self.orientation.to_rotation_matrix().matrix();
                let block = propagated + rotation * noise * rotation.transpose();
                (block, Some(cross))
            }
        };
        self.state
            .admit(detection.id, &position, &block, cross.as_ref())
    }

    /// Applies the error-state correction: additive on translation and every
    /// landmark, multiplicative on attitude.
    fn apply_correction(&mut self, delta: &DVector<f64>) {
        let dim = self.state.dim();
        for i in TRANSLATION {
            self.state.mean[i] += delta[i];
        }
        for i in CAM_DIMS..dim {
            self.state.mean[i] += delta[i];
        }

        let mut dtheta = delta.fixed_rows::<3>(3).into_owned();
        let magnitude = dtheta.norm();
        if magnitude > ATTITUDE_CLIP {
            warn!(
                "attitude correction of {magnitude:.3} rad exceeds the small-angle regime; clipping"
            );
            dtheta *= ATTITUDE_CLIP / magnitude;
        }
        // Compose-then-reset: left-multiply the small-angle quaternion onto
        // the nominal orientation, renormalize, and leave the error state at
        // zero. The mean's attitude slice (3..6) is never written, so the
        // reset invariant holds by construction.
        let delta_q = UnitQuaternion::from_quaternion(Quaternion::new(
            1.0,
            dtheta.x / 2.0,
            dtheta.y / 2.0,
            dtheta.z / 2.0,
        ));
        self.orientation = delta_q * self.orientation;
        self.orientation.renormalize();
    }
}

impl SlamFilter for MultiplicativeEkf {
    fn predict(&mut self) {
        if let Some(prediction) = self.motion.predict() {
            self.state.set_translation(&prediction.translation);
            if prediction.gain != 1.0 {
                self.state.scale_block(TRANSLATION, prediction.gain);
            }
        }
        self.state
            .add_diagonal_noise(TRANSLATION, self.config.translation_process_noise);
        self.state
            .add_diagonal_noise(ATTITUDE, self.config.attitude_process_noise);
        // Landmark blocks and the virtual quaternion slot: identity
        // transition, zero noise.
    }

    fn update(&mut self, detections: &[Detection]) -> FrameReport {
        let mut report = FrameReport::default();
        let (kept, dropped) = sanitize_detections(detections);
        report.dropped = dropped;

        // Admit first-time markers before linearizing, so the frame's own
        // observation of a new marker participates in the batched correction.
        let mut observed = Vec::with_capacity(kept.len());
        for detection in &kept {
            match self.state.index_of(detection.id) {
                Some(slot) => observed.push((slot, *detection)),
                None => {
                    if !self.state.camera_is_finite() {
                        warn!(
                            "deferring admission of marker {}: camera state is not finite",
                            detection.id
                        );
                        report.deferred.push(detection.id);
                        continue;
                    }
                    match self.admit_landmark(detection) {
                        Ok(slot) => {
                            report.admitted.push(detection.id);
                            observed.push((slot, *detection));
                        }
                        Err(err) => {
                            warn!("deferring admission of marker {}: {err}", detection.id);
                            report.deferred.push(detection.id);
                        }
                    }
                }
            }
        }

        if observed.is_empty() {
            self.motion.record(self.state.translation());
            return report;
        }

        // One joint innovation vector and Jacobian for the whole frame. The
        // markers share the camera state, so stacking is what keeps the
        // correction's cross-correlations honest.
        let dim = self.state.dim();
        let rows = 3 * observed.len();
        let mut jacobian = DMatrix::zeros(rows, dim);
        let mut innovation = DVector::zeros(rows);
        let camera = self.state.translation();
        let h_translation = measurement::jacobian_translation(&self.orientation);
        let h_landmark = measurement::jacobian_landmark(&self.orientation);

        for (i, (slot, detection)) in observed.iter().enumerate() {
            let row = 3 * i;
            let landmark = self.state.landmark_position(*slot);
            let predicted = measurement::predict(&self.orientation, &camera, &landmark);
            innovation
                .fixed_rows_mut::<3>(row)
                .copy_from(&(detection.position - predicted));
            jacobian
                .fixed_view_mut::<3, 3>(row, 0)
                .copy_from(&h_translation);
            jacobian
                .fixed_view_mut::<3, 3>(row, 3)
                .copy_from(&measurement::jacobian_attitude(
                    &self.orientation,
                    &camera,
                    &landmark,
                ));
            // Columns 6..9 (virtual quaternion slot) stay zero.
            jacobian
                .fixed_view_mut::<3, 3>(row, self.state.landmark_offset(*slot))
                .copy_from(&h_landmark);
        }

        let ids: Vec<_> = observed.iter().map(|(_, d)| d.id).collect();
        let noise = stacked_noise(&self.config, &ids);

        match kalman_correct(&mut self.state, &jacobian, &innovation, &noise) {
            Some(delta) => {
                self.apply_correction(&delta);
                report.corrected = true;
            }
            None => warn!("singular innovation covariance; keeping prediction-only state"),
        }

        self.motion.record(self.state.translation());
        report
    }

    fn camera_orientation(&self) -> UnitQuaternion<f64> {
        self.orientation
    }

    fn state(&self) -> &FilterState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut FilterState {
        &mut self.state
    }

    fn config(&self) -> &SlamConfig {
        &self.config
    }
}
