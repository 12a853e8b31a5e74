pub mod reference;

pub use super::*;
pub use crate::camera::RasterCamera;
pub use burn::tensor::{Bool, Int};
pub use reference::*;

use crate::spherical_harmonics::SH_DEGREE_MAX;
use burn::tensor::TensorData;
use std::fmt;

/// The rasterization kernel seam.
///
/// The GPU kernel is a host-controlled native subsystem; substituting a CPU
/// reference backend or a mock must not touch camera or orchestration logic.
pub trait Rasterizer<B: Backend>: Send + Sync + fmt::Debug {
    /// Rasterizes the Gaussians into a color image, a depth image and
    /// per-Gaussian screen radii.
    ///
    /// Assumed deterministic for identical inputs on identical hardware.
    /// Bit-reproducibility across hardware is not guaranteed.
    fn rasterize(
        &self,
        input: RasterInput<B>,
        settings: &RasterSettings,
    ) -> Result<RasterOutput<B>, Error>;
}

#[derive(Clone, Debug)]
pub struct RasterInput<B: Backend> {
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P, 2]`, all zeros.
    ///
    /// A side channel the kernel fills with projected screen positions. It
    /// receives position gradients during training and is inert for
    /// inference, but its shape contract is kept either way.
    pub positions_2d: Tensor<B, 2>,
    /// `[P, M, 3]`, mutually exclusive with `colors_precomputed`.
    pub colors_sh: Option<Tensor<B, 3>>,
    /// `[P, 3]`, mutually exclusive with `colors_sh`.
    pub colors_precomputed: Option<Tensor<B, 2>>,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `[P, 3]`, mutually exclusive with `covariances_3d`.
    pub scalings: Option<Tensor<B, 2>>,
    /// `[P, 4]`, mutually exclusive with `covariances_3d`.
    pub rotations: Option<Tensor<B, 2>>,
    /// `[P, 3, 3]`, mutually exclusive with `scalings` and `rotations`.
    pub covariances_3d: Option<Tensor<B, 3>>,
}

/// Per-call kernel configuration.
///
/// Matrices are in **column-major order**, i.e., `M[col][row]`.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterSettings {
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// `tan(FoVx / 2)`
    pub tan_fov_x: f64,
    /// `tan(FoVy / 2)`
    pub tan_fov_y: f64,
    /// Background color.
    pub background: [f32; 3],
    /// Multiplies the Gaussian footprint. It ranges from `0.0` to `1.0`.
    pub scaling_modifier: f64,
    /// Affine transformation from world space to view space.
    pub view_transform: [[f64; 4]; 4],
    /// Combined view-projection transformation.
    pub view_proj_transform: [[f64; 4]; 4],
    /// Active spherical harmonics degree.
    pub colors_sh_degree: u32,
    /// Camera center in world space.
    pub view_position: [f64; 3],
    /// Whether the Gaussians were already frustum-filtered by the caller.
    pub prefiltered: bool,
    pub debug: bool,
}

#[derive(Clone, Debug)]
pub struct RasterOutput<B: Backend> {
    /// `[3, I_y, I_x]`
    pub colors_rgb_2d: Tensor<B, 3>,
    /// `[1, I_y, I_x]`, non-negative
    pub depths_2d: Tensor<B, 3>,
    /// `[P]`
    ///
    /// A radius of zero means the Gaussian was frustum-culled or degenerate.
    pub radii: Tensor<B, 1, Int>,
}

impl<B: Backend> RasterOutput<B> {
    /// The visibility filter.
    ///
    /// `[P]`, elementwise `radii > 0`. Culled Gaussians must be excluded
    /// from statistics over currently visible ones.
    #[inline]
    pub fn visibilities(&self) -> Tensor<B, 1, Bool> {
        self.radii.to_owned().greater_elem(0)
    }
}

/// Assembles kernel inputs for a camera, a cloud and the render options, and
/// invokes the rasterizer.
///
/// Color-source selection, in order: an explicit override color, host-side SH
/// evaluation when enabled, raw SH coefficients otherwise. Covariance-source
/// selection: host-side precompute when enabled, raw scalings and rotations
/// otherwise.
pub fn invoke_rasterizer<B: Backend>(
    rasterizer: &impl Rasterizer<B>,
    camera: &RasterCamera,
    cloud: &GaussianCloud<B>,
    options: &RenderOptions,
    override_colors: Option<Tensor<B, 2>>,
) -> Result<RasterOutput<B>, Error> {
    if cloud.sh_degree() > SH_DEGREE_MAX {
        return Err(Error::Validation(
            format!("colors_sh_degree {}", cloud.sh_degree()),
            format!("no more than {SH_DEGREE_MAX}"),
        ));
    }

    let device = cloud.device();
    // P
    let point_count = cloud.point_count();
    let positions = cloud.positions();

    // [P, 2]
    let positions_2d = Tensor::zeros([point_count, 2], &device);

    let mut colors_sh = None;
    let mut colors_precomputed = None;
    if override_colors.is_some() {
        colors_precomputed = override_colors;
    } else if options.precompute_colors {
        // [P, 3]
        let directions =
            view_directions(positions.to_owned(), camera.view_position.into(), &device);
        colors_precomputed = Some(crate::spherical_harmonics::evaluate_colors_sh(
            cloud.colors_sh(),
            directions,
            cloud.sh_degree(),
        ));
    } else {
        colors_sh = Some(cloud.colors_sh());
    }

    let mut scalings = None;
    let mut rotations = None;
    let mut covariances_3d = None;
    if options.precompute_covariances {
        covariances_3d = Some(cloud.covariances(options.scaling_modifier));
    } else {
        scalings = Some(cloud.scalings());
        rotations = Some(cloud.rotations());
    }

    let input = RasterInput {
        positions,
        positions_2d,
        colors_sh,
        colors_precomputed,
        opacities: cloud.opacities(),
        scalings,
        rotations,
        covariances_3d,
    };
    let settings = RasterSettings {
        image_height: camera.image_height,
        image_width: camera.image_width,
        tan_fov_x: (camera.field_of_view_x / 2.0).tan(),
        tan_fov_y: (camera.field_of_view_y / 2.0).tan(),
        background: options.background.color(),
        scaling_modifier: options.scaling_modifier,
        view_transform: camera.view_transform.into(),
        view_proj_transform: camera.view_proj_transform.into(),
        colors_sh_degree: cloud.sh_degree(),
        view_position: camera.view_position.into(),
        prefiltered: false,
        debug: false,
    };

    rasterizer.rasterize(input, &settings)
}

/// Normalized directions from the camera center towards each Gaussian.
///
/// ## Shapes
///
/// * `positions` - `[P, 3]`
/// * Returns `[P, 3]`
pub fn view_directions<B: Backend>(
    positions: Tensor<B, 2>,
    view_position: [f64; 3],
    device: &B::Device,
) -> Tensor<B, 2> {
    // [1, 3]
    let view_position = Tensor::from_data(
        TensorData::new(view_position.map(|c| c as f32).to_vec(), [1, 3]),
        device,
    );

    // [P, 3]
    let directions = positions - view_position;
    let norms = directions
        .to_owned()
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .clamp_min(f32::EPSILON);
    directions.div(norms)
}
