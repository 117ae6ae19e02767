//! Axis-angle rotation primitives.
//!
//! Rotations are carried as 3-vectors whose direction is the rotation axis
//! and whose magnitude is the angle in radians. Conversion to 3x3 matrices is
//! scoped to system construction; estimator state stays in axis-angle form so
//! that on-manifold updates compose as `R_new = R_old * exp(delta)`.

use faer::{Col, ColRef, Mat, MatRef};

use crate::E;

/// Angle below which the Rodrigues formula switches to its series expansion.
const SMALL_ANGLE: E = 1e-10;

/// Converts an axis-angle vector to its 3x3 rotation matrix (Rodrigues).
pub fn angle_axis_to_rotation_matrix(angle_axis: ColRef<E>) -> Mat<E> {
    let theta = angle_axis.norm_l2();
    let k = skew(angle_axis);
    let k2 = &k * &k;

    if theta < SMALL_ANGLE {
        // Second-order expansion, exact to within floating point for tiny angles.
        Mat::from_fn(3, 3, |i, j| identity(i, j) + k[(i, j)] + 0.5 * k2[(i, j)])
    } else {
        let a = theta.sin() / theta;
        let b = (1.0 - theta.cos()) / (theta * theta);
        Mat::from_fn(3, 3, |i, j| identity(i, j) + a * k[(i, j)] + b * k2[(i, j)])
    }
}

/// Converts a 3x3 rotation matrix to its axis-angle vector.
///
/// The returned vector has magnitude in [0, pi]. Angles near 0 fall back to
/// the first-order skew extraction; angles near pi are recovered from the
/// matrix diagonal, where the skew part loses all information.
pub fn rotation_matrix_to_angle_axis(m: MatRef<E>) -> Col<E> {
    // 2 sin(theta) * axis
    let rx = m[(2, 1)] - m[(1, 2)];
    let ry = m[(0, 2)] - m[(2, 0)];
    let rz = m[(1, 0)] - m[(0, 1)];

    let sin_theta = 0.5 * (rx * rx + ry * ry + rz * rz).sqrt();
    let cos_theta = (0.5 * (m[(0, 0)] + m[(1, 1)] + m[(2, 2)] - 1.0)).clamp(-1.0, 1.0);
    let theta = sin_theta.atan2(cos_theta);

    if sin_theta > SMALL_ANGLE {
        let scale = theta / (2.0 * sin_theta);
        return Col::from_fn(3, |i| scale * [rx, ry, rz][i]);
    }

    if cos_theta > 0.0 {
        // theta ~ 0: log(R) ~ skew part / 2
        return Col::from_fn(3, |i| 0.5 * [rx, ry, rz][i]);
    }

    // theta ~ pi: R ~ 2 a a^T - I, recover |a_i| from the diagonal and fix
    // signs from the off-diagonal entries relative to the largest component.
    let mut axis = [0.0; 3];
    for (i, a) in axis.iter_mut().enumerate() {
        *a = (((m[(i, i)] - cos_theta) / (1.0 - cos_theta)).max(0.0)).sqrt();
    }
    let k = (0..3)
        .max_by(|&a, &b| axis[a].partial_cmp(&axis[b]).unwrap())
        .unwrap();
    for i in 0..3 {
        if i != k && (m[(k, i)] + m[(i, k)]) < 0.0 {
            axis[i] = -axis[i];
        }
    }
    let norm = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
    Col::from_fn(3, |i| theta * axis[i] / norm)
}

/// Axis-angle of the rotation product `R(lhs) * R(rhs)`.
///
/// The negation of an axis-angle vector is its inverse rotation, so relative
/// rotations invert without a matrix round trip.
pub fn multiply_angle_axis(lhs: ColRef<E>, rhs: ColRef<E>) -> Col<E> {
    let product = angle_axis_to_rotation_matrix(lhs) * angle_axis_to_rotation_matrix(rhs);
    rotation_matrix_to_angle_axis(product.as_ref())
}

/// Per-edge cycle residual `log(R(r_j)^T * R(r_ij) * R(r_i))`.
///
/// Zero exactly when the measurement `r_ij` is consistent with the absolute
/// orientations `r_i`, `r_j` under the convention `R_j = R_ij * R_i`.
pub fn relative_rotation_error(r_ij: ColRef<E>, r_i: ColRef<E>, r_j: ColRef<E>) -> Col<E> {
    let m = angle_axis_to_rotation_matrix(r_j).transpose()
        * angle_axis_to_rotation_matrix(r_ij)
        * angle_axis_to_rotation_matrix(r_i);
    rotation_matrix_to_angle_axis(m.as_ref())
}

/// Wraps an axis-angle vector so its magnitude lies in (-pi, pi].
///
/// The axis-angle negation identity only holds for normalized rotation
/// vectors; all caller-supplied rotations pass through here on entry.
pub fn normalize_angle_axis(angle_axis: ColRef<E>) -> Col<E> {
    let theta = angle_axis.norm_l2();
    if theta <= std::f64::consts::PI {
        return angle_axis.to_owned();
    }
    let mut wrapped = theta % (2.0 * std::f64::consts::PI);
    if wrapped > std::f64::consts::PI {
        wrapped -= 2.0 * std::f64::consts::PI;
    }
    let scale = wrapped / theta;
    Col::from_fn(3, |i| scale * angle_axis[i])
}

/// Determinant of a 3x3 matrix.
pub fn determinant3(m: MatRef<E>) -> E {
    m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
        - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
        + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
}

fn identity(i: usize, j: usize) -> E {
    if i == j { 1.0 } else { 0.0 }
}

fn skew(v: ColRef<E>) -> Mat<E> {
    let mut k = Mat::zeros(3, 3);
    k[(0, 1)] = -v[2];
    k[(0, 2)] = v[1];
    k[(1, 0)] = v[2];
    k[(1, 2)] = -v[0];
    k[(2, 0)] = -v[1];
    k[(2, 1)] = v[0];
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn col(v: [E; 3]) -> Col<E> {
        Col::from_fn(3, |i| v[i])
    }

    #[test]
    fn test_rotation_matrix_round_trip() {
        for aa in [
            [0.3, -0.2, 0.9],
            [1e-12, 0.0, 0.0],
            [0.0, PI - 1e-7, 0.0],
            [PI / 2.0_f64.sqrt(), PI / 2.0_f64.sqrt(), 0.0],
        ] {
            let v = col(aa);
            let recovered = rotation_matrix_to_angle_axis(
                angle_axis_to_rotation_matrix(v.as_ref()).as_ref(),
            );
            assert!((&recovered - &v).norm_l2() < 1e-8, "{aa:?} -> {recovered:?}");
        }
    }

    #[test]
    fn test_rotation_matrix_near_pi() {
        // Exactly pi about z: the skew part vanishes entirely.
        let v = col([0.0, 0.0, PI]);
        let m = angle_axis_to_rotation_matrix(v.as_ref());
        let recovered = rotation_matrix_to_angle_axis(m.as_ref());
        assert!((recovered.norm_l2() - PI).abs() < 1e-9);
        assert!(recovered[2].abs() > PI - 1e-9);
    }

    #[test]
    fn test_multiply_matches_matrix_product() {
        let a = col([0.1, 0.4, -0.3]);
        let b = col([-0.7, 0.2, 0.5]);
        let via_matrices = rotation_matrix_to_angle_axis(
            (angle_axis_to_rotation_matrix(a.as_ref()) * angle_axis_to_rotation_matrix(b.as_ref()))
                .as_ref(),
        );
        let direct = multiply_angle_axis(a.as_ref(), b.as_ref());
        assert!((&via_matrices - &direct).norm_l2() < 1e-12);
    }

    #[test]
    fn test_negation_is_inverse() {
        let a = col([0.4, -0.8, 0.2]);
        let composed = multiply_angle_axis(a.as_ref(), (-&a).as_ref());
        assert!(composed.norm_l2() < 1e-12);
    }

    #[test]
    fn test_same_axis_angles_add() {
        let a = col([0.0, 0.0, 30.0 * PI / 180.0]);
        let b = col([0.0, 0.0, 45.0 * PI / 180.0]);
        let c = multiply_angle_axis(a.as_ref(), b.as_ref());
        assert!((c[2] - 75.0 * PI / 180.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_wraps_large_angles() {
        let v = col([0.0, 1.5 * PI, 0.0]);
        let n = normalize_angle_axis(v.as_ref());
        assert!((n[1] + 0.5 * PI).abs() < 1e-12);

        // Equivalent rotation.
        let diff = multiply_angle_axis(v.as_ref(), (-&n).as_ref());
        assert!(diff.norm_l2() < 1e-9);
    }

    #[test]
    fn test_residual_zero_on_consistent_edge() {
        let r_i = col([0.2, -0.1, 0.3]);
        let r_ij = col([0.5, 0.4, -0.2]);
        let r_j = multiply_angle_axis(r_ij.as_ref(), r_i.as_ref());
        let e = relative_rotation_error(r_ij.as_ref(), r_i.as_ref(), r_j.as_ref());
        assert!(e.norm_l2() < 1e-12);
    }

    #[test]
    fn test_determinant_of_rotation_is_one() {
        let m = angle_axis_to_rotation_matrix(col([0.3, 0.1, -0.9]).as_ref());
        assert!((determinant3(m.as_ref()) - 1.0).abs() < 1e-12);
        assert!((determinant3((-&m).as_ref()) + 1.0).abs() < 1e-12);
    }
}
