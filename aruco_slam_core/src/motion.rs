// aruco_slam_core/src/motion.rs

//! The camera motion model: a bounded-history moving average over absolute
//! translations.
//!
//! The recurrence `predicted = last + (last - last_minus_n) / n` extrapolates
//! the mean per-frame displacement over the window. It is deliberately not
//! Markov: the n-back endpoint lives in this buffer, outside the formal filter
//! state, and the covariance transition treats it as exogenous (see
//! [`transition_gain`](Prediction::gain)). Orientation carries no motion model
//! at all; the nominal quaternion is held and only process noise is added.

use nalgebra::Vector3;
use std::collections::VecDeque;

/// The outcome of one translation prediction.
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    /// The extrapolated camera translation.
    pub translation: Vector3<f64>,
    /// Net linear-transition coefficient `1 + 1/span` on the in-state
    /// translation. The two-term recurrence weights the latest translation by
    /// `1 + 1/n` and the n-back endpoint by `-1/n`; with the endpoint held
    /// outside the state, the in-state gain is what propagates covariance.
    /// Exactly 1 while no history span exists yet.
    pub gain: f64,
}

/// Bounded history of post-correction camera translations, one per frame.
#[derive(Debug, Clone)]
pub struct MovingAverageModel {
    window: usize,
    history: VecDeque<Vector3<f64>>,
}

impl MovingAverageModel {
    /// `window` is the endpoint separation `n` in frames; the buffer holds
    /// `n + 1` translations so both endpoints are available once it fills.
    pub fn new(window: usize) -> Self {
        assert!(window >= 1, "motion window validated at construction");
        Self {
            window,
            history: VecDeque::with_capacity(window + 1),
        }
    }

    /// Records the frame's final (post-correction) camera translation.
    pub fn record(&mut self, translation: Vector3<f64>) {
        if self.history.len() == self.window + 1 {
            self.history.pop_front();
        }
        self.history.push_back(translation);
    }

    /// Extrapolates the next camera translation from the buffer endpoints.
    ///
    /// Startup policy: until the buffer spans the full window, extrapolate
    /// linearly over however much history exists (`span = len - 1` frames);
    /// with a single recorded translation, hold position. Returns `None` only
    /// before anything was recorded.
    pub fn predict(&self) -> Option<Prediction> {
        let last = *self.history.back()?;
        let span = self.history.len() - 1;
        if span == 0 {
            return Some(Prediction {
                translation: last,
                gain: 1.0,
            });
        }
        let oldest = self.history[0];
        let step = (last - oldest) / span as f64;
        Some(Prediction {
            translation: last + step,
            gain: 1.0 + 1.0 / span as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_history_yields_no_prediction() {
        let model = MovingAverageModel::new(3);
        assert!(model.predict().is_none());
    }

    #[test]
    fn single_entry_holds_position() {
        let mut model = MovingAverageModel::new(3);
        model.record(Vector3::new(1.0, 2.0, 3.0));
        let prediction = model.predict().unwrap();
        assert_abs_diff_eq!(prediction.translation, Vector3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(prediction.gain, 1.0);
    }

    #[test]
    fn partial_history_extrapolates_over_available_span() {
        let mut model = MovingAverageModel::new(5);
        model.record(Vector3::zeros());
        model.record(Vector3::new(0.0, 0.0, 2.0));
        // span = 1 frame, step = (last - oldest) / 1
        let prediction = model.predict().unwrap();
        assert_abs_diff_eq!(prediction.translation, Vector3::new(0.0, 0.0, 4.0));
        assert_abs_diff_eq!(prediction.gain, 2.0);
    }

    #[test]
    fn constant_displacement_is_predicted_exactly_after_window_fills() {
        let displacement = Vector3::new(0.1, -0.2, 0.05);
        let window = 4;
        let mut model = MovingAverageModel::new(window);
        for k in 0..=window {
            model.record(displacement * k as f64);
        }
        let prediction = model.predict().unwrap();
        let expected = displacement * (window as f64 + 1.0);
        assert_abs_diff_eq!(prediction.translation, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(prediction.gain, 1.0 + 1.0 / window as f64, epsilon = 1e-12);
    }

    #[test]
    fn buffer_stays_bounded_and_tracks_latest_window() {
        let mut model = MovingAverageModel::new(2);
        for k in 0..10 {
            model.record(Vector3::new(k as f64, 0.0, 0.0));
        }
        // Endpoints are frames 7 and 9: step = (9 - 7) / 2 = 1.
        let prediction = model.predict().unwrap();
        assert_abs_diff_eq!(prediction.translation, Vector3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn stationary_history_predicts_no_motion() {
        let mut model = MovingAverageModel::new(3);
        for _ in 0..6 {
            model.record(Vector3::new(1.0, 1.0, 1.0));
        }
        let prediction = model.predict().unwrap();
        assert_abs_diff_eq!(prediction.translation, Vector3::new(1.0, 1.0, 1.0));
    }
}
