//! Conversion from the scene-graph camera convention to the rasterizer one.

pub use super::*;

use crate::error::Error;
use nalgebra::{Matrix3, Matrix4, Vector3};

/// Near clipping plane of the rasterizer projection.
pub const Z_NEAR: f64 = 0.01;
/// Far clipping plane of the rasterizer projection.
pub const Z_FAR: f64 = 100.0;

/// A rasterizer-facing view of a [`CameraPose`].
///
/// Created fresh per render call and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterCamera {
    /// World-to-camera rotation, stored **transposed**.
    ///
    /// The rasterization kernel expects the column-major (glm) rotation
    /// convention.
    pub rotation: Matrix3<f64>,
    /// World-to-camera translation.
    pub translation: Vector3<f64>,
    /// The horizontal field of view in radians.
    pub field_of_view_x: f64,
    /// The vertical field of view in radians.
    pub field_of_view_y: f64,
    /// Image width.
    pub image_width: u32,
    /// Image height.
    pub image_height: u32,
    /// Affine transformation from world space to view space.
    pub view_transform: Matrix4<f64>,
    /// Combined view-projection transformation.
    pub view_proj_transform: Matrix4<f64>,
    /// Camera center in world space.
    pub view_position: Vector3<f64>,
}

/// Converts scene-graph camera poses into [`RasterCamera`]s.
///
/// The optional orientation correction is a dataset-level re-alignment of the
/// whole capture rig. It is fixed at construction and applied once per pose,
/// before the per-camera axis conversion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CameraAdapter {
    pub orientation_transform: Option<Matrix4<f64>>,
}

impl CameraAdapter {
    #[inline]
    pub const fn new(orientation_transform: Option<Matrix4<f64>>) -> Self {
        Self {
            orientation_transform,
        }
    }

    /// Converts a pose into the rasterizer camera convention.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateCamera`] when the corrected camera-to-world
    /// transform is non-finite or non-invertible. NaNs never propagate into
    /// the rasterizer.
    pub fn adapt(
        &self,
        pose: &CameraPose,
    ) -> Result<RasterCamera, Error> {
        // [4, 4] <- [3, 4]
        let mut camera_to_world = Matrix4::identity();
        camera_to_world
            .fixed_view_mut::<3, 4>(0, 0)
            .copy_from(&pose.camera_to_world);

        if let Some(orientation_transform) = &self.orientation_transform {
            camera_to_world = orientation_transform * camera_to_world;
        }

        flip_camera_axes(&mut camera_to_world);

        if !camera_to_world.iter().all(|value| value.is_finite()) {
            return Err(Error::DegenerateCamera(
                "the camera-to-world transform has non-finite entries".into(),
            ));
        }
        let world_to_camera = camera_to_world.try_inverse().ok_or_else(|| {
            Error::DegenerateCamera(
                "the camera-to-world transform is not invertible".into(),
            )
        })?;

        let rotation = world_to_camera.fixed_view::<3, 3>(0, 0).transpose();
        let translation = world_to_camera.fixed_view::<3, 1>(0, 3).into_owned();
        let view_position = camera_to_world.fixed_view::<3, 1>(0, 3).into_owned();

        let field_of_view_x = focal2fov(pose.focal_length_x, pose.image_width);
        let field_of_view_y = focal2fov(pose.focal_length_y, pose.image_height);

        let view_proj_transform =
            projection_transform(field_of_view_x, field_of_view_y) * world_to_camera;

        Ok(RasterCamera {
            rotation,
            translation,
            field_of_view_x,
            field_of_view_y,
            image_width: pose.image_width,
            image_height: pose.image_height,
            view_transform: world_to_camera,
            view_proj_transform,
            view_position,
        })
    }
}

/// Converts the rotation block from OpenGL/Blender camera axes (Y up, Z back)
/// to COLMAP camera axes (Y down, Z forward).
///
/// Exactly the rotation **columns** 1 and 2 are negated. The translation
/// column is untouched.
#[inline]
pub fn flip_camera_axes(camera_to_world: &mut Matrix4<f64>) {
    camera_to_world.fixed_view_mut::<3, 1>(0, 1).neg_mut();
    camera_to_world.fixed_view_mut::<3, 1>(0, 2).neg_mut();
}

/// Returns the perspective projection for the given fields of view.
///
/// The frustum is the symmetric 3DGS one ([`Z_NEAR`], [`Z_FAR`], positive
/// depth forward).
pub fn projection_transform(
    field_of_view_x: f64,
    field_of_view_y: f64,
) -> Matrix4<f64> {
    let tan_half_x = (field_of_view_x / 2.0).tan();
    let tan_half_y = (field_of_view_y / 2.0).tan();
    let z_scale = Z_FAR / (Z_FAR - Z_NEAR);

    Matrix4::new(
        1.0 / tan_half_x, 0.0, 0.0, 0.0,
        0.0, 1.0 / tan_half_y, 0.0, 0.0,
        0.0, 0.0, z_scale, -Z_FAR * Z_NEAR / (Z_FAR - Z_NEAR),
        0.0, 0.0, 1.0, 0.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3x4;

    fn pose(camera_to_world: Matrix3x4<f64>) -> CameraPose {
        CameraPose {
            camera_to_world,
            focal_length_x: 400.0,
            focal_length_y: 300.0,
            image_width: 800,
            image_height: 600,
        }
    }

    #[test]
    fn flip_columns_not_rows() {
        // Rotation by 90 degrees around Z with a translation.
        let mut output = Matrix4::new(
            0.0, -1.0, 0.0, 1.0,
            1.0, 0.0, 0.0, 2.0,
            0.0, 0.0, 1.0, 3.0,
            0.0, 0.0, 0.0, 1.0,
        );
        flip_camera_axes(&mut output);

        // Hand-computed: columns 1 and 2 of the rotation block negated,
        // translation kept.
        let target = Matrix4::new(
            0.0, 1.0, 0.0, 1.0,
            1.0, 0.0, 0.0, 2.0,
            0.0, 0.0, -1.0, 3.0,
            0.0, 0.0, 0.0, 1.0,
        );
        assert_eq!(output, target);

        // Negating rows 1 and 2 instead would give a different matrix.
        let row_flipped = Matrix4::new(
            0.0, 1.0, 0.0, 1.0,
            -1.0, 0.0, 0.0, 2.0,
            0.0, 0.0, -1.0, 3.0,
            0.0, 0.0, 0.0, 1.0,
        );
        assert_ne!(output, row_flipped);
    }

    #[test]
    fn flip_twice_restores() {
        let source = Matrix4::new(
            0.36, 0.48, -0.8, 0.1,
            -0.8, 0.6, 0.0, -0.2,
            0.48, 0.64, 0.6, 0.3,
            0.0, 0.0, 0.0, 1.0,
        );
        let mut output = source;
        flip_camera_axes(&mut output);
        assert_ne!(output, source);

        // Only an explicit re-flip restores the source convention.
        flip_camera_axes(&mut output);
        assert_eq!(output, source);
    }

    #[test]
    fn adapt_identity_pose() {
        let camera = CameraAdapter::default()
            .adapt(&pose(Matrix3x4::identity()))
            .unwrap();

        // The flipped rotation is its own inverse and its own transpose.
        let target = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
        assert_eq!(camera.rotation, target);
        assert_eq!(camera.translation, Vector3::zeros());
        assert_eq!(camera.view_position, Vector3::zeros());

        approx::assert_relative_eq!(
            camera.field_of_view_x,
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
        approx::assert_relative_eq!(
            camera.field_of_view_y,
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );

        // A point in front of the flipped camera projects onto the image.
        let point = camera.view_transform * nalgebra::Vector4::new(0.0, 0.0, -2.0, 1.0);
        approx::assert_relative_eq!(point.z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn adapt_applies_orientation_before_flip() {
        // Reorientation by 180 degrees around X.
        let orientation = Matrix4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, -1.0, 0.0, 0.0,
            0.0, 0.0, -1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        let adapter = CameraAdapter::new(Some(orientation));
        let source = pose(Matrix3x4::new(
            1.0, 0.0, 0.0, 1.0,
            0.0, 1.0, 0.0, 2.0,
            0.0, 0.0, 1.0, 3.0,
        ));
        let camera = adapter.adapt(&source).unwrap();

        // The rig translation is reoriented as well.
        assert_eq!(camera.view_position, Vector3::new(1.0, -2.0, -3.0));
        let target = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(camera.rotation, target);
    }

    #[test]
    fn adapt_rejects_singular_transform() {
        let output = CameraAdapter::default().adapt(&pose(Matrix3x4::zeros()));
        assert!(matches!(output, Err(Error::DegenerateCamera(_))));
    }

    #[test]
    fn adapt_rejects_non_finite_transform() {
        let mut source = Matrix3x4::identity();
        source[(0, 3)] = f64::NAN;
        let output = CameraAdapter::default().adapt(&pose(source));
        assert!(matches!(output, Err(Error::DegenerateCamera(_))));
    }

    #[test]
    fn view_proj_combines_projection_and_view() {
        let camera = CameraAdapter::default()
            .adapt(&pose(Matrix3x4::identity()))
            .unwrap();

        let target = projection_transform(
            camera.field_of_view_x,
            camera.field_of_view_y,
        ) * camera.view_transform;
        assert_eq!(camera.view_proj_transform, target);
    }
}
