//! A deterministic CPU implementation of the rasterization kernel.
//!
//! It follows the EWA splatting pipeline of the GPU kernel exactly, so it
//! doubles as executable documentation of the kernel contract.

pub use super::*;

use crate::{
    scene::gaussian_3d::covariances_3d,
    spherical_harmonics::evaluate_colors_sh,
};
use burn::tensor::TensorData;
use nalgebra::{Matrix2x3, Matrix3, Matrix4, Vector4};
use rayon::prelude::*;

/// Low-pass filter added to both diagonals of the 2D covariance.
///
/// It guarantees every splat covers at least about one pixel.
pub const FILTER_LOW_PASS: f64 = 0.3;

/// View-space depth at or below which Gaussians are culled.
pub const DEPTH_MIN: f64 = 0.2;

const ALPHA_MAX: f32 = 0.99;
const ALPHA_MIN: f32 = 1.0 / 255.0;
const TRANSMITTANCE_MIN: f32 = 1e-4;

#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceRasterizer;

/// A Gaussian that survived culling, in screen space.
#[derive(Clone, Debug)]
struct ProjectedGaussian {
    /// View-space depth.
    depth: f64,
    /// Projected center in pixels.
    position_2d: [f64; 2],
    /// Inverse 2D covariance, `[xx, xy, yy]`.
    conic: [f64; 3],
    opacity: f32,
    color_rgb: [f32; 3],
    /// Touched pixel rectangle, `[x_min, x_max, y_min, y_max]` (exclusive max).
    bounds: [usize; 4],
}

impl<B: Backend> Rasterizer<B> for ReferenceRasterizer {
    fn rasterize(
        &self,
        input: RasterInput<B>,
        settings: &RasterSettings,
    ) -> Result<RasterOutput<B>, Error> {
        let device = input.positions.device();
        // P
        let point_count = input.positions.dims()[0];
        // I_y
        let image_height = settings.image_height as usize;
        // I_x
        let image_width = settings.image_width as usize;
        // I_y * I_x
        let pixel_count = image_height * image_width;

        #[cfg(debug_assertions)]
        log::debug!(
            target: "seasplat_renderer::render",
            "ReferenceRasterizer::rasterize > {point_count} points",
        );

        if point_count == 0 {
            let mut colors = vec![0.0; 3 * pixel_count];
            for (channel, value) in settings.background.iter().enumerate() {
                colors[channel * pixel_count..(channel + 1) * pixel_count]
                    .fill(*value);
            }
            return Ok(RasterOutput {
                colors_rgb_2d: Tensor::from_data(
                    TensorData::new(colors, [3, image_height, image_width]),
                    &device,
                ),
                depths_2d: Tensor::zeros([1, image_height, image_width], &device),
                radii: Tensor::from_data(
                    TensorData::new(Vec::<i32>::new(), [0]),
                    &device,
                ),
            });
        }

        // [P, 3]
        let colors_rgb = match (input.colors_precomputed, input.colors_sh) {
            (Some(colors_rgb), _) => colors_rgb,
            (None, Some(colors_sh)) => {
                let directions = view_directions(
                    input.positions.to_owned(),
                    settings.view_position,
                    &device,
                );
                evaluate_colors_sh(colors_sh, directions, settings.colors_sh_degree)
            },
            (None, None) => {
                return Err(Error::Validation(
                    "colors".into(),
                    "either SH coefficients or precomputed colors".into(),
                ))
            },
        };

        // [P, 3, 3]
        let covariances =
            match (input.covariances_3d, input.scalings, input.rotations) {
                (Some(covariances), ..) => covariances,
                (None, Some(scalings), Some(rotations)) => covariances_3d(
                    scalings,
                    rotations,
                    settings.scaling_modifier,
                ),
                _ => {
                    return Err(Error::Validation(
                        "covariances".into(),
                        "either precomputed covariances or scalings and rotations"
                            .into(),
                    ))
                },
            };

        let positions = into_host(input.positions)?;
        let opacities = into_host(input.opacities)?;
        let colors_rgb = into_host(colors_rgb)?;
        let covariances = into_host(covariances)?;

        let view_transform = Matrix4::from(settings.view_transform);
        let view_rotation = view_transform.fixed_view::<3, 3>(0, 0).into_owned();
        let focal_x = image_width as f64 / (2.0 * settings.tan_fov_x);
        let focal_y = image_height as f64 / (2.0 * settings.tan_fov_y);
        let limit_x = 1.3 * settings.tan_fov_x;
        let limit_y = 1.3 * settings.tan_fov_y;

        // (i32, Option<ProjectedGaussian>) * P
        let projections = (0..point_count)
            .into_par_iter()
            .map(|index| {
                let position_world = Vector4::new(
                    positions[3 * index] as f64,
                    positions[3 * index + 1] as f64,
                    positions[3 * index + 2] as f64,
                    1.0,
                );
                let position_view = view_transform * position_world;
                let depth = position_view.z;
                if depth <= DEPTH_MIN {
                    return (0, None);
                }

                // The Jacobian is evaluated at a frustum-clamped position.
                let x = (position_view.x / depth).clamp(-limit_x, limit_x) * depth;
                let y = (position_view.y / depth).clamp(-limit_y, limit_y) * depth;
                let jacobian = Matrix2x3::new(
                    focal_x / depth, 0.0, -focal_x * x / (depth * depth),
                    0.0, focal_y / depth, -focal_y * y / (depth * depth),
                );

                let covariance_3d = Matrix3::from_iterator(
                    covariances[9 * index..9 * index + 9]
                        .iter()
                        .map(|value| *value as f64),
                );

                // [2, 2]
                let mut covariance_2d = jacobian
                    * view_rotation
                    * covariance_3d
                    * view_rotation.transpose()
                    * jacobian.transpose();
                covariance_2d[(0, 0)] += FILTER_LOW_PASS;
                covariance_2d[(1, 1)] += FILTER_LOW_PASS;

                let determinant = covariance_2d.determinant();
                if determinant == 0.0 {
                    return (0, None);
                }
                let conic = [
                    covariance_2d[(1, 1)] / determinant,
                    -covariance_2d[(0, 1)] / determinant,
                    covariance_2d[(0, 0)] / determinant,
                ];

                // The screen radius is three standard deviations along the
                // major axis.
                let middle =
                    (covariance_2d[(0, 0)] + covariance_2d[(1, 1)]) / 2.0;
                let lambda_max =
                    middle + (middle * middle - determinant).max(0.1).sqrt();
                let radius = (lambda_max.sqrt() * 3.0).ceil() as i32;

                let position_2d = [
                    focal_x * position_view.x / depth
                        + (image_width as f64 - 1.0) / 2.0,
                    focal_y * position_view.y / depth
                        + (image_height as f64 - 1.0) / 2.0,
                ];
                let bounds = [
                    (position_2d[0] - radius as f64)
                        .floor()
                        .clamp(0.0, image_width as f64)
                        as usize,
                    (position_2d[0] + radius as f64 + 1.0)
                        .ceil()
                        .clamp(0.0, image_width as f64)
                        as usize,
                    (position_2d[1] - radius as f64)
                        .floor()
                        .clamp(0.0, image_height as f64)
                        as usize,
                    (position_2d[1] + radius as f64 + 1.0)
                        .ceil()
                        .clamp(0.0, image_height as f64)
                        as usize,
                ];
                if bounds[0] >= bounds[1] || bounds[2] >= bounds[3] {
                    return (0, None);
                }

                let projected = ProjectedGaussian {
                    depth,
                    position_2d,
                    conic,
                    opacity: opacities[index],
                    color_rgb: [
                        colors_rgb[3 * index],
                        colors_rgb[3 * index + 1],
                        colors_rgb[3 * index + 2],
                    ],
                    bounds,
                };
                (radius, Some(projected))
            })
            .collect::<Vec<_>>();

        let radii = projections
            .iter()
            .map(|(radius, _)| *radius)
            .collect::<Vec<i32>>();
        let mut visible = projections
            .into_iter()
            .filter_map(|(_, projected)| projected)
            .collect::<Vec<_>>();
        visible.par_sort_unstable_by(|a, b| a.depth.total_cmp(&b.depth));

        // Front-to-back alpha compositing in global depth order. Iterating
        // Gaussians in the outer loop with a per-pixel transmittance buffer
        // visits each pixel's splats in the same depth order as a per-pixel
        // loop would.
        let mut transmittances = vec![1.0; pixel_count];
        let mut colors = vec![0.0; 3 * pixel_count];
        let mut depths = vec![0.0; pixel_count];
        for projected in &visible {
            let [x_min, x_max, y_min, y_max] = projected.bounds;
            for pixel_y in y_min..y_max {
                for pixel_x in x_min..x_max {
                    let pixel = pixel_y * image_width + pixel_x;
                    let transmittance = transmittances[pixel];
                    if transmittance < TRANSMITTANCE_MIN {
                        continue;
                    }

                    let dx = projected.position_2d[0] - pixel_x as f64;
                    let dy = projected.position_2d[1] - pixel_y as f64;
                    let power = -0.5
                        * (projected.conic[0] * dx * dx
                            + projected.conic[2] * dy * dy)
                        - projected.conic[1] * dx * dy;
                    if power > 0.0 {
                        continue;
                    }

                    let alpha = (projected.opacity * power.exp() as f32)
                        .min(ALPHA_MAX);
                    if alpha < ALPHA_MIN {
                        continue;
                    }

                    let weight = alpha * transmittance;
                    for channel in 0..3 {
                        colors[channel * pixel_count + pixel] +=
                            weight * projected.color_rgb[channel];
                    }
                    depths[pixel] += weight * projected.depth as f32;
                    transmittances[pixel] = transmittance * (1.0 - alpha);
                }
            }
        }

        // The remaining transmittance goes to the background.
        for (pixel, transmittance) in transmittances.iter().enumerate() {
            for (channel, value) in settings.background.iter().enumerate() {
                colors[channel * pixel_count + pixel] += transmittance * value;
            }
        }

        Ok(RasterOutput {
            colors_rgb_2d: Tensor::from_data(
                TensorData::new(colors, [3, image_height, image_width]),
                &device,
            ),
            depths_2d: Tensor::from_data(
                TensorData::new(depths, [1, image_height, image_width]),
                &device,
            ),
            radii: Tensor::from_data(
                TensorData::new(radii, [point_count]),
                &device,
            ),
        })
    }
}

fn into_host<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, Error> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|error| Error::KernelExecution(format!("{error:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn settings(image_size: u32) -> RasterSettings {
        let identity = Matrix4::<f64>::identity().into();
        RasterSettings {
            image_height: image_size,
            image_width: image_size,
            tan_fov_x: 1.0,
            tan_fov_y: 1.0,
            background: [1.0, 1.0, 1.0],
            scaling_modifier: 1.0,
            view_transform: identity,
            view_proj_transform: identity,
            colors_sh_degree: 0,
            view_position: [0.0, 0.0, 0.0],
            prefiltered: false,
            debug: false,
        }
    }

    fn single_gaussian_input(position: [f32; 3]) -> RasterInput<B> {
        let device = Default::default();
        RasterInput {
            positions: Tensor::from_data([position], &device),
            positions_2d: Tensor::zeros([1, 2], &device),
            colors_sh: None,
            colors_precomputed: Some(Tensor::from_data(
                [[1.0, 0.0, 0.0]],
                &device,
            )),
            opacities: Tensor::from_data([[1.0]], &device),
            scalings: None,
            rotations: None,
            covariances_3d: Some(Tensor::from_data(
                [[
                    [1.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0],
                    [0.0, 0.0, 1.0],
                ]],
                &device,
            )),
        }
    }

    #[test]
    fn rasterize_empty_cloud() {
        let device = Default::default();
        let input = RasterInput::<B> {
            positions: Tensor::zeros([0, 3], &device),
            positions_2d: Tensor::zeros([0, 2], &device),
            colors_sh: None,
            colors_precomputed: Some(Tensor::zeros([0, 3], &device)),
            opacities: Tensor::zeros([0, 1], &device),
            scalings: None,
            rotations: None,
            covariances_3d: Some(Tensor::zeros([0, 3, 3], &device)),
        };

        let output = ReferenceRasterizer
            .rasterize(input, &settings(2))
            .unwrap();

        assert_eq!(output.radii.dims(), [0]);
        let colors = output
            .colors_rgb_2d
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(colors.iter().all(|value| *value == 1.0));
        let depths = output.depths_2d.into_data().to_vec::<f32>().unwrap();
        assert!(depths.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn rasterize_centered_gaussian() {
        let input = single_gaussian_input([0.0, 0.0, 2.0]);

        let output = ReferenceRasterizer
            .rasterize(input, &settings(3))
            .unwrap();

        let radii = output
            .radii
            .into_data()
            .convert::<i32>()
            .to_vec::<i32>()
            .unwrap();
        assert!(radii[0] > 0);

        // The center pixel is fully covered, so it composites at the
        // saturated alpha over the white background.
        let colors = output
            .colors_rgb_2d
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let center = 3 + 1;
        approx::assert_relative_eq!(colors[center], 0.99 + 0.01, epsilon = 1e-6);
        approx::assert_relative_eq!(colors[9 + center], 0.01, epsilon = 1e-6);

        let depths = output.depths_2d.into_data().to_vec::<f32>().unwrap();
        approx::assert_relative_eq!(depths[center], 0.99 * 2.0, epsilon = 1e-6);
    }

    #[test]
    fn rasterize_culls_behind_camera() {
        let input = single_gaussian_input([0.0, 0.0, -2.0]);

        let output = ReferenceRasterizer
            .rasterize(input, &settings(2))
            .unwrap();

        let radii = output
            .radii
            .to_owned()
            .into_data()
            .convert::<i32>()
            .to_vec::<i32>()
            .unwrap();
        assert_eq!(radii, vec![0]);
        let visibilities = output
            .visibilities()
            .into_data()
            .to_vec::<bool>()
            .unwrap();
        assert_eq!(visibilities, vec![false]);

        let colors = output
            .colors_rgb_2d
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(colors.iter().all(|value| *value == 1.0));
    }

    #[test]
    fn rasterize_requires_a_color_source() {
        let mut input = single_gaussian_input([0.0, 0.0, 2.0]);
        input.colors_precomputed = None;

        let output = ReferenceRasterizer.rasterize(input, &settings(2));
        assert!(matches!(output, Err(Error::Validation(..))));
    }
}
