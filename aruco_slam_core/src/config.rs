// aruco_slam_core/src/config.rs

use crate::error::SlamError;
use crate::types::MarkerId;
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which filter formulation to run. Chosen once at construction; both expose
/// the same [`SlamFilter`](crate::estimation::SlamFilter) surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterVariant {
    /// Error-state (multiplicative) EKF: nominal quaternion kept out of the
    /// covariance, corrected through a 3-parameter attitude error.
    #[default]
    Mekf,
    /// Additive EKF: quaternion components sit directly in the state vector
    /// and are renormalized after every correction.
    Additive,
}

/// How the covariance of a freshly admitted landmark is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LandmarkInit {
    /// First-order propagation of camera uncertainty and measurement noise
    /// through the initialization formula, including the cross-covariance
    /// with the rest of the state. The consistent choice, and the default.
    Propagated,
    /// A fixed conservative diagonal with zero cross-covariance. Cheaper, but
    /// understates the camera-landmark correlation, which biases later
    /// updates toward over-confidence in that correlation being absent.
    Fixed { uncertainty: f64 },
}

impl Default for LandmarkInit {
    fn default() -> Self {
        LandmarkInit::Propagated
    }
}

/// Everything the filter needs to know at construction time.
///
/// The defaults reproduce the tuning the system was developed with: a fairly
/// confident initial camera pose, noisy single-frame marker measurements, and
/// a short moving-average motion window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub variant: FilterVariant,
    /// Motion-model window `n`: the translation recurrence extrapolates from
    /// the history endpoints `n` frames apart. Must be at least 1.
    pub window: usize,
    /// Per-axis process noise variance added to the camera translation block
    /// at every prediction.
    pub translation_process_noise: f64,
    /// Per-axis process noise variance added to the attitude block (the
    /// 3-parameter error state for the MEKF, the raw quaternion components
    /// for the additive variant).
    pub attitude_process_noise: f64,
    /// Default per-axis measurement noise variance for a marker detection.
    pub measurement_noise: f64,
    /// Per-marker diagonal overrides of the measurement noise, keyed by the
    /// raw marker id.
    pub measurement_noise_overrides: HashMap<u32, [f64; 3]>,
    /// Per-axis variance of the initial camera block.
    pub initial_camera_uncertainty: f64,
    pub landmark_init: LandmarkInit,
}

impl Default for SlamConfig {
    fn default() -> Self {
        Self {
            variant: FilterVariant::default(),
            window: 5,
            translation_process_noise: 0.3,
            attitude_process_noise: 0.3,
            measurement_noise: 0.9,
            measurement_noise_overrides: HashMap::new(),
            initial_camera_uncertainty: 0.1,
            landmark_init: LandmarkInit::default(),
        }
    }
}

impl SlamConfig {
    /// Checks the configuration before any frame is processed. Construction
    /// fails fast on a malformed configuration; nothing after this point is
    /// allowed to abort a run.
    pub fn validate(&self) -> Result<(), SlamError> {
        if self.window == 0 {
            return Err(SlamError::InvalidWindow);
        }
        for (name, value) in [
            (
                "translation process noise",
                self.translation_process_noise,
            ),
            ("attitude process noise", self.attitude_process_noise),
            (
                "initial camera uncertainty",
                self.initial_camera_uncertainty,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SlamError::InvalidNoise { name, value });
            }
        }
        if !self.measurement_noise.is_finite() || self.measurement_noise <= 0.0 {
            return Err(SlamError::NonPositiveMeasurementNoise(
                self.measurement_noise,
            ));
        }
        for diag in self.measurement_noise_overrides.values() {
            for &value in diag {
                if !value.is_finite() || value <= 0.0 {
                    return Err(SlamError::NonPositiveMeasurementNoise(value));
                }
            }
        }
        if let LandmarkInit::Fixed { uncertainty } = self.landmark_init {
            if !uncertainty.is_finite() || uncertainty <= 0.0 {
                return Err(SlamError::InvalidLandmarkUncertainty(uncertainty));
            }
        }
        Ok(())
    }

    /// The 3x3 measurement noise block `R_m` for one marker.
    pub fn measurement_noise_block(&self, id: MarkerId) -> Matrix3<f64> {
        match self.measurement_noise_overrides.get(&id.0) {
            Some(diag) => Matrix3::from_diagonal(&nalgebra::Vector3::new(
                diag[0], diag[1], diag[2],
            )),
            None => Matrix3::identity() * self.measurement_noise,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SlamConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = SlamConfig {
            window: 0,
            ..SlamConfig::default()
        };
        assert!(matches!(config.validate(), Err(SlamError::InvalidWindow)));
    }

    #[test]
    fn negative_process_noise_is_rejected() {
        let config = SlamConfig {
            translation_process_noise: -0.1,
            ..SlamConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SlamError::InvalidNoise { .. })
        ));
    }

    #[test]
    fn zero_measurement_noise_is_rejected() {
        let config = SlamConfig {
            measurement_noise: 0.0,
            ..SlamConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SlamError::NonPositiveMeasurementNoise(_))
        ));
    }

    #[test]
    fn per_marker_noise_override_is_used() {
        let mut config = SlamConfig::default();
        config
            .measurement_noise_overrides
            .insert(7, [0.1, 0.2, 0.3]);

        let block = config.measurement_noise_block(MarkerId(7));
        assert_eq!(block[(0, 0)], 0.1);
        assert_eq!(block[(1, 1)], 0.2);
        assert_eq!(block[(2, 2)], 0.3);

        let default_block = config.measurement_noise_block(MarkerId(8));
        assert_eq!(default_block[(0, 0)], config.measurement_noise);
        assert_eq!(default_block[(0, 1)], 0.0);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = SlamConfig {
            variant: FilterVariant::Additive,
            landmark_init: LandmarkInit::Fixed { uncertainty: 0.7 },
            ..SlamConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SlamConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.variant, FilterVariant::Additive);
        assert_eq!(back.landmark_init, LandmarkInit::Fixed { uncertainty: 0.7 });
    }
}
