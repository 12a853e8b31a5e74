pub mod adapter;

pub use adapter::*;

use nalgebra::Matrix3x4;

/// A posed pinhole camera in the scene-graph convention.
///
/// The transform maps camera space to world space with OpenGL/Blender axes
/// (Y up, Z back). Conversion to the rasterizer convention happens in
/// [`CameraAdapter`].
#[derive(Clone, Debug, PartialEq)]
pub struct CameraPose {
    /// Affine transformation from camera space to world space.
    ///
    /// The projective row is omitted by the source and appended during
    /// adaptation.
    pub camera_to_world: Matrix3x4<f64>,
    /// Horizontal focal length in pixels.
    pub focal_length_x: f64,
    /// Vertical focal length in pixels.
    pub focal_length_y: f64,
    /// Image width.
    pub image_width: u32,
    /// Image height.
    pub image_height: u32,
}

/// Dimension operations
impl CameraPose {
    /// Returns the aspect ratio (`width / height`).
    #[inline]
    pub const fn aspect_ratio(&self) -> f64 {
        self.image_width as f64 / self.image_height as f64
    }
}

/// Returns the field of view in radians for a focal length in pixels.
#[inline]
pub fn focal2fov(
    focal_length: f64,
    pixel_count: u32,
) -> f64 {
    2.0 * (pixel_count as f64 / (2.0 * focal_length)).atan()
}

/// Returns the focal length in pixels for a field of view in radians.
#[inline]
pub fn fov2focal(
    field_of_view: f64,
    pixel_count: u32,
) -> f64 {
    pixel_count as f64 / (2.0 * (field_of_view / 2.0).tan())
}

#[cfg(test)]
mod tests {
    #[test]
    fn focal_and_fov_round_trip() {
        use super::*;

        for (focal_length, pixel_count) in
            [(600.0, 800), (1111.1111, 800), (480.0, 640), (35.0, 1)]
        {
            let output = fov2focal(focal2fov(focal_length, pixel_count), pixel_count);
            approx::assert_relative_eq!(output, focal_length, epsilon = 1e-10);
        }
    }

    #[test]
    fn focal2fov_right_angle() {
        use super::*;

        // A focal length of half the image width spans 90 degrees.
        let output = focal2fov(400.0, 800);
        approx::assert_relative_eq!(
            output,
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn aspect_ratio() {
        use super::*;

        let pose = CameraPose {
            camera_to_world: Matrix3x4::identity(),
            focal_length_x: 600.0,
            focal_length_y: 600.0,
            image_width: 1920,
            image_height: 1080,
        };
        approx::assert_relative_eq!(pose.aspect_ratio(), 16.0 / 9.0);
    }
}
