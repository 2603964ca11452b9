// aruco_slam_core/src/lib.rs

//! Recursive state estimation for fiducial-marker SLAM.
//!
//! The library estimates the 6-DoF pose of a moving camera together with the
//! 3-D positions of a growing set of static marker landmarks, fed by a stream
//! of per-frame camera-frame marker detections. Marker detection itself,
//! visualization, and map storage are external collaborators; this crate owns
//! only the filtering mathematics.

pub mod config;
pub mod error;
pub mod estimation;
pub mod map;
pub mod measurement;
pub mod motion;
pub mod prelude;
pub mod state;
pub mod types;
