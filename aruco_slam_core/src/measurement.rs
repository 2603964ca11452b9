// aruco_slam_core/src/measurement.rs

//! The marker measurement model and its analytic Jacobians.
//!
//! A detection reports a landmark's position in the camera frame, so the
//! predicted measurement for landmark `l` seen from camera `(p, q)` is
//! `y_hat = R^T(q) (l - p)`. All Jacobians are evaluated at the current
//! nominal state; the attitude perturbation is composed in only during
//! linearization, never baked into `R` itself.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Quaternion, UnitQuaternion, Vector3, Vector4};

/// `y_hat = R^T(q) (l - p)`: the landmark position expressed in the camera
/// frame.
pub fn predict(
    q: &UnitQuaternion<f64>,
    camera: &Vector3<f64>,
    landmark: &Vector3<f64>,
) -> Vector3<f64> {
    q.inverse_transform_vector(&(landmark - camera))
}

/// `R^T(q)` as a plain matrix.
pub fn rotation_transpose(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    q.to_rotation_matrix().matrix().transpose()
}

/// Jacobian of the predicted measurement w.r.t. the camera translation:
/// `d(R^T (l - p)) / dp = -R^T`.
pub fn jacobian_translation(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    -rotation_transpose(q)
}

/// Jacobian w.r.t. the 3-parameter attitude error, for a perturbation
/// left-composed onto the nominal quaternion (`q <- dq ⊗ q`):
/// `d(y_hat) / d(dtheta) = R^T(q) skew(l - p)`, first order in `dtheta`.
pub fn jacobian_attitude(
    q: &UnitQuaternion<f64>,
    camera: &Vector3<f64>,
    landmark: &Vector3<f64>,
) -> Matrix3<f64> {
    rotation_transpose(q) * (landmark - camera).cross_matrix()
}

/// Jacobian w.r.t. the landmark position: `+R^T(q)`.
pub fn jacobian_landmark(q: &UnitQuaternion<f64>) -> Matrix3<f64> {
    rotation_transpose(q)
}

// --- Quaternion-parameter Jacobians (additive filter variant) ---
//
// The additive variant keeps the quaternion components (w, x, y, z) directly
// in the state vector and renormalizes after every correction, so its
// measurement map is q -> R(q / |q|)^T (l - p). The derivative of that map at
// a unit q is the derivative of the homogeneous (quadratic) rotation formula
// right-multiplied by the normalization projector `I - q q^T`; dropping the
// projector leaves a spurious radial component.

/// Derivative of the homogeneous formula `R(q) v` w.r.t. `(w, x, y, z)`,
/// evaluated at unit `q`. `R(q)v = (w^2 - u.u) v + 2 (u.v) u + 2 w (u x v)`.
fn rotate_jacobian_homogeneous(q: &Quaternion<f64>, v: &Vector3<f64>) -> Matrix3x4<f64> {
    let w = q.w;
    let u = q.vector().into_owned();
    let d_w: Vector3<f64> = (v * w + u.cross(v)) * 2.0;
    let d_u: Matrix3<f64> = (u.dot(v) * Matrix3::identity() + u * v.transpose()
        - v * u.transpose()
        - w * v.cross_matrix())
        * 2.0;

    let mut jac = Matrix3x4::zeros();
    jac.set_column(0, &d_w);
    jac.fixed_view_mut::<3, 3>(0, 1).copy_from(&d_u);
    jac
}

fn normalization_projector(q: &UnitQuaternion<f64>) -> Matrix4<f64> {
    let qv = Vector4::new(q.w, q.i, q.j, q.k);
    Matrix4::identity() - qv * qv.transpose()
}

/// Jacobian of `q -> R(q / |q|) v` w.r.t. `(w, x, y, z)` at unit `q`.
/// Used when propagating landmark-initialization uncertainty through
/// `l = p + R(q) z` in the additive variant.
pub fn rotate_jacobian(q: &UnitQuaternion<f64>, v: &Vector3<f64>) -> Matrix3x4<f64> {
    rotate_jacobian_homogeneous(q.quaternion(), v) * normalization_projector(q)
}

/// Jacobian of `q -> R(q / |q|)^T v` w.r.t. `(w, x, y, z)` at unit `q`:
/// the additive variant's measurement Jacobian w.r.t. its quaternion block.
/// `R^T(q) = R(q*)`, so this is the homogeneous Jacobian at the conjugate,
/// chained through the conjugation's sign flips, then projected.
pub fn rotate_transpose_jacobian(q: &UnitQuaternion<f64>, v: &Vector3<f64>) -> Matrix3x4<f64> {
    let conjugate = q.quaternion().conjugate();
    let jac = rotate_jacobian_homogeneous(&conjugate, v);
    let sign_flip = Matrix4::from_diagonal(&Vector4::new(1.0, -1.0, -1.0, -1.0));
    jac * sign_flip * normalization_projector(q)
}
