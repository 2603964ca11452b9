// aruco_slam_core/src/state.rs

//! The owner of the concatenated camera + landmark state.
//!
//! The layout is `[camera block | landmark 0 | landmark 1 | ...]`, where the
//! camera block's width depends on the filter variant and every landmark
//! occupies 3 slots. A marker id is mapped to a slot index exactly once, on
//! admission, and that index is stable for the lifetime of the run; landmarks
//! are never removed (static-world assumption).

use crate::error::SlamError;
use crate::types::{CovarianceMatrix, MarkerId, StateVector};
use nalgebra::{DMatrix, Matrix3, Vector3};
use std::collections::HashMap;
use std::ops::Range;

pub const LANDMARK_DIMS: usize = 3;

#[derive(Debug, Clone)]
pub struct FilterState {
    cam_dims: usize,
    /// The mean vector `x`, dimension `cam_dims + 3 * landmark_count`.
    pub mean: StateVector,
    /// The covariance matrix `P`, matching the mean's dimension at all times.
    pub covariance: CovarianceMatrix,
    slots: HashMap<MarkerId, usize>,
    /// Slot index -> marker id, in admission order.
    order: Vec<MarkerId>,
}

impl FilterState {
    /// Creates a landmark-free state with the given camera block covariance.
    pub fn new(cam_dims: usize, initial_camera_covariance: DMatrix<f64>) -> Self {
        assert_eq!(initial_camera_covariance.nrows(), cam_dims);
        assert_eq!(initial_camera_covariance.ncols(), cam_dims);
        Self {
            cam_dims,
            mean: StateVector::zeros(cam_dims),
            covariance: initial_camera_covariance,
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.nrows()
    }

    pub fn cam_dims(&self) -> usize {
        self.cam_dims
    }

    pub fn landmark_count(&self) -> usize {
        self.order.len()
    }

    /// The slot index assigned to `id`, if it has been admitted.
    pub fn index_of(&self, id: MarkerId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    /// Marker ids in slot order.
    pub fn marker_ids(&self) -> &[MarkerId] {
        &self.order
    }

    /// Offset of landmark `slot` within the mean vector.
    pub fn landmark_offset(&self, slot: usize) -> usize {
        self.cam_dims + LANDMARK_DIMS * slot
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.mean.fixed_rows::<3>(0).into_owned()
    }

    pub fn set_translation(&mut self, translation: &Vector3<f64>) {
        self.mean.fixed_rows_mut::<3>(0).copy_from(translation);
    }

    pub fn landmark_position(&self, slot: usize) -> Vector3<f64> {
        self.mean
            .fixed_rows::<3>(self.landmark_offset(slot))
            .into_owned()
    }

    /// Diagonal of landmark `slot`'s covariance block.
    pub fn landmark_variance(&self, slot: usize) -> Vector3<f64> {
        let offset = self.landmark_offset(slot);
        Vector3::new(
            self.covariance[(offset, offset)],
            self.covariance[(offset + 1, offset + 1)],
            self.covariance[(offset + 2, offset + 2)],
        )
    }

    /// Landmark `slot`'s full 3x3 covariance block.
    pub fn landmark_covariance(&self, slot: usize) -> Matrix3<f64> {
        let offset = self.landmark_offset(slot);
        self.covariance
            .fixed_view::<3, 3>(offset, offset)
            .into_owned()
    }

    /// True when every camera-block mean entry is a usable number. A false
    /// result defers landmark admission: initializing from a corrupt camera
    /// state would insert a corrupt slot that can never be removed.
    pub fn camera_is_finite(&self) -> bool {
        self.mean.rows(0, self.cam_dims).iter().all(|v| v.is_finite())
    }

    /// Extends the state by one landmark: 3 new mean rows holding `position`,
    /// 3 new covariance rows/columns holding `block` on the diagonal and
    /// `cross` (a `3 x dim` strip, if provided) against the existing state.
    /// Every pre-existing mean and covariance entry is preserved unchanged.
    ///
    /// Passing `cross = None` means zero cross-covariance. That is an accepted
    /// simplification, not an exact model: the initialization formula couples
    /// the new landmark to the camera pose, so omitting the coupling
    /// understates the true correlation and leaves later updates
    /// under-confident about it.
    pub fn admit(
        &mut self,
        id: MarkerId,
        position: &Vector3<f64>,
        block: &Matrix3<f64>,
        cross: Option<&DMatrix<f64>>,
    ) -> Result<usize, SlamError> {
        if self.slots.contains_key(&id) {
            return Err(SlamError::AlreadyAdmitted(id));
        }
        let old_dim = self.dim();
        if let Some(cross) = cross {
            assert_eq!(cross.nrows(), LANDMARK_DIMS);
            assert_eq!(cross.ncols(), old_dim);
        }

        let slot = self.order.len();
        self.slots.insert(id, slot);
        self.order.push(id);

        let mut mean = self.mean.clone().resize_vertically(old_dim + LANDMARK_DIMS, 0.0);
        mean.fixed_rows_mut::<3>(old_dim).copy_from(position);
        self.mean = mean;

        let new_dim = old_dim + LANDMARK_DIMS;
        let mut covariance = DMatrix::zeros(new_dim, new_dim);
        covariance
            .view_mut((0, 0), (old_dim, old_dim))
            .copy_from(&self.covariance);
        covariance
            .fixed_view_mut::<3, 3>(old_dim, old_dim)
            .copy_from(block);
        if let Some(cross) = cross {
            covariance
                .view_mut((old_dim, 0), (LANDMARK_DIMS, old_dim))
                .copy_from(cross);
            covariance
                .view_mut((0, old_dim), (old_dim, LANDMARK_DIMS))
                .copy_from(&cross.transpose());
        }
        self.covariance = covariance;

        Ok(slot)
    }

    /// Scales the rows and columns of `range` by `gain`, i.e. applies the
    /// transition `F = diag(gain on range, 1 elsewhere)` as `P <- F P F^T`.
    pub fn scale_block(&mut self, range: Range<usize>, gain: f64) {
        let dim = self.dim();
        for i in range.clone() {
            for j in 0..dim {
                self.covariance[(i, j)] *= gain;
            }
        }
        for j in range {
            for i in 0..dim {
                self.covariance[(i, j)] *= gain;
            }
        }
    }

    /// Adds `variance` to the covariance diagonal over `range`.
    pub fn add_diagonal_noise(&mut self, range: Range<usize>, variance: f64) {
        for i in range {
            self.covariance[(i, i)] += variance;
        }
    }

    /// Restores exact symmetry after an update. The Joseph form keeps the
    /// covariance close to symmetric, but floating-point products still drift.
    pub fn symmetrize(&mut self) {
        let transposed = self.covariance.transpose();
        self.covariance += transposed;
        self.covariance *= 0.5;
    }
}
