// aruco_slam_core/src/estimation/filters/ekf.rs

//! The additive EKF variant: the camera quaternion's four components sit
//! directly in the state vector and covariance, corrections are plain vector
//! additions, and the quaternion is renormalized after every update. Simpler
//! than the multiplicative filter but linearizes over a redundant,
//! non-minimal orientation parameterization; kept as the baseline variant.

use crate::config::{LandmarkInit, SlamConfig};
use crate::error::SlamError;
use crate::estimation::{kalman_correct, sanitize_detections, stacked_noise};
use crate::estimation::{FrameReport, SlamFilter};
use crate::measurement;
use crate::motion::MovingAverageModel;
use crate::state::FilterState;
use crate::types::Detection;
use log::warn;
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, UnitQuaternion};

/// Camera block width: translation (0..3) + quaternion `(w, x, y, z)` (3..7).
pub const CAM_DIMS: usize = 7;

const TRANSLATION: std::ops::Range<usize> = 0..3;
const QUATERNION: std::ops::Range<usize> = 3..7;

/// A correction that collapses the quaternion below this norm is numerically
/// meaningless; the previous orientation is restored instead.
const QUAT_NORM_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct AdditiveEkf {
    config: SlamConfig,
    state: FilterState,
    motion: MovingAverageModel,
}

impl AdditiveEkf {
    pub fn new(config: SlamConfig) -> Result<Self, SlamError> {
        config.validate()?;
        let initial_covariance =
            DMatrix::identity(CAM_DIMS, CAM_DIMS) * config.initial_camera_uncertainty;
        let mut state = FilterState::new(CAM_DIMS, initial_covariance);
        // Identity quaternion; a zero quaternion would be degenerate from the
        // first linearization onward.
        state.mean[3] = 1.0;
        let mut motion = MovingAverageModel::new(config.window);
        motion.record(state.translation());
        Ok(Self {
            config,
            state,
            motion,
        })
    }

    fn orientation(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(Quaternion::new(
            self.state.mean[3],
            self.state.mean[4],
            self.state.mean[5],
            self.state.mean[6],
        ))
    }

    fn write_orientation(&mut self, q: &UnitQuaternion<f64>) {
        self.state.mean[3] = q.w;
        self.state.mean[4] = q.i;
        self.state.mean[5] = q.j;
        self.state.mean[6] = q.k;
    }

    fn admit_landmark(&mut self, detection: &Detection) -> Result<usize, SlamError> {
        let orientation = self.orientation();
        let camera = self.state.translation();
        let rotated = orientation.transform_vector(&detection.position);
        let position = camera + rotated;
        let noise = self.config.measurement_noise_block(detection.id);

        let (block, cross) = match self.config.landmark_init {
            LandmarkInit::Fixed { uncertainty } => (Matrix3::identity() * uncertainty, None),
            LandmarkInit::Propagated => {
                // l = p + R(q) z, so A = [ I | d(R z)/dq | 0 ... ].
                let dim = self.state.dim();
                let mut init_jacobian = DMatrix::zeros(3, dim);
                init_jacobian
                    .fixed_view_mut::<3, 3>(0, 0)
                    .copy_from(&Matrix3::identity());
                init_jacobian
                    .fixed_view_mut::<3, 4>(0, 3)
                    .copy_from(&measurement::rotate_jacobian(
                        &orientation,
                        &detection.position,
                    ));

                let cross = &init_jacobian * &self.state.covariance;
                let propagated = (&cross * init_jacobian.transpose())
                    .fixed_view::<3, 3>(0, 0)
                    .into_owned();
                let rotation = *orientation.to_rotation_matrix().matrix();
                let block = propagated + rotation * noise * rotation.transpose();
                (block, Some(cross))
            }
        };
        self.state
            .admit(detection.id, &position, &block, cross.as_ref())
    }

    fn apply_correction(&mut self, delta: &DVector<f64>) {
        let previous = self.orientation();
        self.state.mean += delta;

        let raw = Quaternion::new(
            self.state.mean[3],
            self.state.mean[4],
            self.state.mean[5],
            self.state.mean[6],
        );
        let norm = raw.norm();
        if norm < QUAT_NORM_FLOOR {
            warn!(
                "correction collapsed the quaternion (norm {norm:.2e}); restoring previous orientation"
            );
            self.write_orientation(&previous);
        } else {
            self.write_orientation(&UnitQuaternion::from_quaternion(raw));
        }
    }
}

impl SlamFilter for AdditiveEkf {
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
            .add_diagonal_noise(QUATERNION, self.config.attitude_process_noise);
    }

    fn update(&mut self, detections: &[Detection]) -> FrameReport {
        let mut report = FrameReport::default();
        let (kept, dropped) = sanitize_detections(detections);
        report.dropped = dropped;

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

        let orientation = self.orientation();
        let dim = self.state.dim();
        let rows = 3 * observed.len();
        let mut jacobian = DMatrix::zeros(rows, dim);
        let mut innovation = DVector::zeros(rows);
        let camera = self.state.translation();
        let h_translation = measurement::jacobian_translation(&orientation);
        let h_landmark = measurement::jacobian_landmark(&orientation);

        for (i, (slot, detection)) in observed.iter().enumerate() {
            let row = 3 * i;
            let landmark = self.state.landmark_position(*slot);
            let predicted = measurement::predict(&orientation, &camera, &landmark);
            innovation
                .fixed_rows_mut::<3>(row)
                .copy_from(&(detection.position - predicted));
            jacobian
                .fixed_view_mut::<3, 3>(row, 0)
                .copy_from(&h_translation);
            jacobian
                .fixed_view_mut::<3, 4>(row, 3)
                .copy_from(&measurement::rotate_transpose_jacobian(
                    &orientation,
                    &(landmark - camera),
                ));
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
        self.orientation()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarkerId;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn filter() -> AdditiveEkf {
        AdditiveEkf::new(SlamConfig::default()).unwrap()
    }

    #[test]
    fn construction_rejects_invalid_config() {
        let config = SlamConfig {
            measurement_noise: -1.0,
            ..SlamConfig::default()
        };
        assert!(AdditiveEkf::new(config).is_err());
    }

    #[test]
    fn starts_at_identity_orientation() {
        let filter = filter();
        assert_abs_diff_eq!(
            filter.camera_orientation().angle(),
            0.0,
            epsilon = 1e-12
        );
        assert_eq!(filter.state().dim(), CAM_DIMS);
    }

    #[test]
    fn first_detection_admits_at_projected_position() {
        let mut filter = filter();
        let report = filter.process_frame(&[Detection::new(4, Vector3::new(0.0, 2.0, 0.0))]);
        assert_eq!(report.admitted, vec![MarkerId(4)]);
        let landmark = filter.landmarks()[&MarkerId(4)];
        assert_abs_diff_eq!(landmark, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn quaternion_is_renormalized_after_corrections() {
        let mut filter = filter();
        for k in 0..15 {
            let wobble = 0.03 * (k as f64).cos();
            filter.process_frame(&[
                Detection::new(1, Vector3::new(1.0, wobble, 0.0)),
                Detection::new(2, Vector3::new(0.0, 1.0, wobble)),
            ]);
            let raw = Quaternion::new(
                filter.state().mean[3],
                filter.state().mean[4],
                filter.state().mean[5],
                filter.state().mean[6],
            );
            assert_abs_diff_eq!(raw.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn repeated_observations_shrink_landmark_variance() {
        let mut filter = filter();
        let z = Vector3::new(1.0, 0.0, 0.0);
        filter.process_frame(&[Detection::new(1, z)]);
        let first = filter.landmark_variances()[&MarkerId(1)];
        for _ in 0..9 {
            filter.process_frame(&[Detection::new(1, z)]);
        }
        let last = filter.landmark_variances()[&MarkerId(1)];
        for axis in 0..3 {
            assert!(last[axis] < first[axis]);
        }
    }

    #[test]
    fn degenerate_quaternion_correction_is_refused() {
        let mut filter = filter();
        let before = filter.camera_orientation();
        let mut delta = DVector::zeros(filter.state().dim());
        // Cancel the quaternion exactly: mean holds (1, 0, 0, 0).
        delta[3] = -1.0;
        filter.apply_correction(&delta);
        let after = filter.camera_orientation();
        assert_abs_diff_eq!(before.angle_to(&after), 0.0, epsilon = 1e-12);
    }
}
