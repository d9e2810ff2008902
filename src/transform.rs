use nalgebra::{Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};

/// Translation / rotation / scale split of an affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trs {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Trs {
    /// Rotation components in `(real, i, j, k)` order.
    pub fn rotation_components(&self) -> [f32; 4] {
        let q = self.rotation.quaternion();
        [q.w, q.i, q.j, q.k]
    }
}

const MIN_AXIS_LENGTH: f64 = 1e-8;

/// Computes the transform of a joint relative to its parent.
///
/// Returns `None` when the parent transform is not invertible.
///
/// # Arguments
///
/// * `parent_world` - World transform of the parent joint.
/// * `world` - World transform of the joint.
///
/// # Returns
///
/// `Some(local)` such that `parent_world * local == world`.
pub fn parent_relative(parent_world: &Matrix4<f64>, world: &Matrix4<f64>) -> Option<Matrix4<f64>> {
    parent_world.try_inverse().map(|inverse| inverse * world)
}

/// Splits an affine matrix into translation, rotation and scale.
///
/// Shear is discarded. A negative determinant is folded into the X scale so
/// the rotation stays proper. Returns `None` for degenerate or non-finite
/// matrices.
///
/// # Arguments
///
/// * `matrix` - Affine transform to decompose.
///
/// # Returns
///
/// `Some(Trs)` when every basis axis has a usable length.
pub fn decompose_transform(matrix: &Matrix4<f64>) -> Option<Trs> {
    if matrix.iter().any(|value| !value.is_finite()) {
        return None;
    }

    let translation = Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)]);

    let basis_x = Vector3::new(matrix[(0, 0)], matrix[(1, 0)], matrix[(2, 0)]);
    let basis_y = Vector3::new(matrix[(0, 1)], matrix[(1, 1)], matrix[(2, 1)]);
    let basis_z = Vector3::new(matrix[(0, 2)], matrix[(1, 2)], matrix[(2, 2)]);

    let mut scale_x = basis_x.norm();
    let scale_y = basis_y.norm();
    let scale_z = basis_z.norm();

    if scale_x < MIN_AXIS_LENGTH || scale_y < MIN_AXIS_LENGTH || scale_z < MIN_AXIS_LENGTH {
        return None;
    }

    let mut rot_x = basis_x / scale_x;
    let rot_y = basis_y / scale_y;
    let rot_z = basis_z / scale_z;

    if rot_x.cross(&rot_y).dot(&rot_z) < 0.0 {
        scale_x = -scale_x;
        rot_x = -rot_x;
    }

    let rotation_matrix = Matrix3::from_columns(&[rot_x, rot_y, rot_z]).cast::<f32>();
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(
        rotation_matrix,
    ));
    let rotation = UnitQuaternion::new_normalize(rotation.into_inner());

    Some(Trs {
        translation: translation.cast::<f32>(),
        rotation,
        scale: Vector3::new(scale_x, scale_y, scale_z).cast::<f32>(),
    })
}

/// Rebuilds `T * R * S` from its components.
pub fn compose_transform(trs: &Trs) -> Matrix4<f64> {
    let translation_matrix = Translation3::from(trs.translation).to_homogeneous();
    let rotation_matrix = trs.rotation.to_homogeneous();
    let scale_matrix = Matrix4::new_nonuniform_scaling(&trs.scale);
    (translation_matrix * rotation_matrix * scale_matrix).cast::<f64>()
}

/// Builds a local transform from separate translation, rotation and scale.
pub fn trs_matrix(
    translation: &Vector3<f32>,
    rotation: &UnitQuaternion<f32>,
    scale: &Vector3<f32>,
) -> Matrix4<f64> {
    compose_transform(&Trs {
        translation: *translation,
        rotation: *rotation,
        scale: *scale,
    })
}

/// Whether the upper 3x3 block flips handedness.
pub fn has_negative_determinant(matrix: &Matrix4<f64>) -> bool {
    matrix.fixed_view::<3, 3>(0, 0).into_owned().determinant() < 0.0
}

/// Magnitude of the largest component of `v`.
pub fn max_magnitude_component(v: &Vector3<f32>) -> f32 {
    v.x.abs().max(v.y.abs()).max(v.z.abs())
}

/// Strips scale from a matrix, keeping its rotation and translation.
///
/// Degenerate axes fall back to the identity axis.
pub fn orthonormalize(matrix: &Matrix4<f64>) -> Matrix4<f32> {
    match decompose_transform(matrix) {
        Some(trs) => {
            let mut rotation = trs.rotation.to_homogeneous();
            rotation[(0, 3)] = trs.translation.x;
            rotation[(1, 3)] = trs.translation.y;
            rotation[(2, 3)] = trs.translation.z;
            rotation
        }
        None => {
            let mut fallback = Matrix4::<f32>::identity();
            fallback[(0, 3)] = matrix[(0, 3)] as f32;
            fallback[(1, 3)] = matrix[(1, 3)] as f32;
            fallback[(2, 3)] = matrix[(2, 3)] as f32;
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn given_uniformly_scaled_transform_when_decomposing_then_recompose_matches() {
        let rotation = UnitQuaternion::from_euler_angles(0.3, -1.1, 0.7);
        let original = trs_matrix(
            &Vector3::new(1.5, -2.0, 0.25),
            &rotation,
            &Vector3::new(2.0, 2.0, 2.0),
        );

        let trs = decompose_transform(&original).expect("transform should decompose");
        let rebuilt = compose_transform(&trs);

        assert!((rebuilt - original).norm() < 1e-4);
        assert!((trs.scale - Vector3::new(2.0, 2.0, 2.0)).norm() < 1e-4);
    }

    #[test]
    fn given_mirrored_transform_when_decomposing_then_x_scale_is_negative() {
        let mirrored = Matrix4::new_nonuniform_scaling(&Vector3::new(-1.0, 1.0, 1.0));

        let trs = decompose_transform(&mirrored).expect("mirror should decompose");

        assert!(trs.scale.x < 0.0);
        assert!(has_negative_determinant(&mirrored));
        assert!((compose_transform(&trs) - mirrored).norm() < 1e-5);
    }

    #[test]
    fn given_collapsed_axis_when_decomposing_then_none_is_returned() {
        let flat = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 0.0, 1.0));
        assert!(decompose_transform(&flat).is_none());
    }

    #[test]
    fn given_parent_and_child_when_resolving_relative_then_parent_times_local_is_world() {
        let parent = Translation3::new(0.0, 1.0, 0.0).to_homogeneous();
        let world = Translation3::new(0.0, 3.0, 1.0).to_homogeneous()
            * UnitQuaternion::from_euler_angles(0.0, 0.5, 0.0).to_homogeneous();

        let local = parent_relative(&parent, &world).expect("parent is invertible");

        assert!((parent * local - world).norm() < 1e-9);
    }

    #[test]
    fn given_vector_when_taking_max_component_then_sign_is_ignored() {
        assert_eq!(max_magnitude_component(&Vector3::new(1.0, -4.0, 2.0)), 4.0);
    }
}
