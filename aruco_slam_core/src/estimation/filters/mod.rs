// aruco_slam_core/src/estimation/filters/mod.rs

mod ekf;
mod mekf;

pub use ekf::AdditiveEkf;
pub use mekf::MultiplicativeEkf;

/// Attitude corrections larger than this are outside the small-angle regime
/// the linearization assumes; they are clipped before being composed so a
/// single bad frame cannot fling the orientation. Should not trigger in
/// normal operation given the error-state reset.
pub(crate) const ATTITUDE_CLIP: f64 = std::f64::consts::FRAC_PI_4;
