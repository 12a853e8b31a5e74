pub mod rasterize;

pub use crate::{
    camera::{CameraAdapter, CameraPose},
    compose::{UnderwaterCompositor, UnderwaterImage},
    error::Error,
    scene::GaussianCloud,
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};
pub use rasterize::*;

use std::fmt;

/// Per-render configuration.
#[derive(Config, Debug)]
pub struct RenderOptions {
    #[config(default = "BackgroundColor::Black")]
    pub background: BackgroundColor,

    /// Multiplies the Gaussian footprint. It ranges from `0.0` to `1.0`.
    #[config(default = 1.0)]
    pub scaling_modifier: f64,

    /// Evaluates the SH colors on the host instead of inside the kernel.
    #[config(default = false)]
    pub precompute_colors: bool,

    /// Computes the 3D covariances on the host instead of inside the kernel.
    #[config(default = false)]
    pub precompute_covariances: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub enum BackgroundColor {
    #[default]
    Black,
    White,
}

impl BackgroundColor {
    #[inline]
    pub const fn color(self) -> [f32; 3] {
        match self {
            Self::Black => [0.0, 0.0, 0.0],
            Self::White => [1.0, 1.0, 1.0],
        }
    }
}

/// Renders Gaussian clouds through a rasterization backend, with an optional
/// underwater image-formation pass on top.
///
/// It holds no mutable state. Concurrent renders against the same cloud each
/// use their own renderer (the compositor models are not `Sync`).
#[derive(Debug)]
pub struct SplatRenderer<B: Backend, R: Rasterizer<B>> {
    pub adapter: CameraAdapter,
    pub rasterizer: R,
    pub compositor: Option<UnderwaterCompositor<B>>,
}

/// The outputs of a render without water effects.
#[derive(Clone)]
pub struct CleanRender<B: Backend> {
    /// `[I_y, I_x, 3]`, in `0.0` to `1.0`
    pub colors_rgb_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 1]`, metric depths
    pub depths_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 1]`, depths divided by the frame maximum
    pub depths_normalized_2d: Tensor<B, 3>,
    /// `[P]`
    pub radii: Tensor<B, 1, Int>,
}

/// The outputs of a render composited through the underwater medium.
#[derive(Clone)]
pub struct UnderwaterRender<B: Backend> {
    pub clean: CleanRender<B>,
    pub maps: UnderwaterImage<B>,
}

/// A render result, tagged by whether the underwater pass ran.
#[derive(Clone)]
pub enum RenderOutput<B: Backend> {
    Clean(CleanRender<B>),
    Underwater(UnderwaterRender<B>),
}

impl<B: Backend, R: Rasterizer<B>> SplatRenderer<B, R> {
    #[inline]
    pub const fn new(
        adapter: CameraAdapter,
        rasterizer: R,
    ) -> Self {
        Self {
            adapter,
            rasterizer,
            compositor: None,
        }
    }

    #[inline]
    pub fn with_compositor(
        mut self,
        compositor: UnderwaterCompositor<B>,
    ) -> Self {
        self.compositor = Some(compositor);
        self
    }

    /// Renders the cloud from the given pose.
    ///
    /// The underwater pass consumes the raw rasterized color and depth
    /// images, not the post-processed ones.
    pub fn render(
        &self,
        pose: &CameraPose,
        cloud: &GaussianCloud<B>,
        options: &RenderOptions,
    ) -> Result<RenderOutput<B>, Error> {
        let camera = self.adapter.adapt(pose)?;

        #[cfg(debug_assertions)]
        log::debug!(
            target: "seasplat_renderer::render",
            "SplatRenderer::render > camera {camera:?}",
        );

        let output =
            invoke_rasterizer(&self.rasterizer, &camera, cloud, options, None)?;
        let radii = output.radii;

        // [3, I_y, I_x]
        let colors_raw = output.colors_rgb_2d;
        // [1, I_y, I_x]
        let depths_raw = output.depths_2d;

        // [I_y, I_x, 3]
        let colors_rgb_2d =
            colors_raw.to_owned().clamp(0.0, 1.0).permute([1, 2, 0]);
        // [I_y, I_x, 1]
        let depths_2d = depths_raw.to_owned().permute([1, 2, 0]);
        let depths_normalized_2d = normalize_depths(depths_2d.to_owned());

        let clean = CleanRender {
            colors_rgb_2d,
            depths_2d,
            depths_normalized_2d,
            radii,
        };

        Ok(match &self.compositor {
            Some(compositor) => RenderOutput::Underwater(UnderwaterRender {
                maps: compositor.compose(colors_raw, depths_raw),
                clean,
            }),
            None => RenderOutput::Clean(clean),
        })
    }
}

impl<B: Backend> CleanRender<B> {
    /// The visibility filter.
    ///
    /// `[P]`, elementwise `radii > 0`.
    #[inline]
    pub fn visibilities(&self) -> Tensor<B, 1, Bool> {
        self.radii.to_owned().greater_elem(0)
    }
}

impl<B: Backend> RenderOutput<B> {
    /// The clean render, regardless of the underwater pass.
    #[inline]
    pub fn clean(&self) -> &CleanRender<B> {
        match self {
            Self::Clean(clean) => clean,
            Self::Underwater(underwater) => &underwater.clean,
        }
    }
}

impl Default for RenderOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Divides the depths by the frame maximum.
///
/// A frame with no hit pixel has a zero maximum and stays all zero instead of
/// producing NaNs.
///
/// ## Shapes
///
/// * `depths` - `[I_y, I_x, 1]`, non-negative
/// * Returns `[I_y, I_x, 1]`, in `0.0` to `1.0`
pub fn normalize_depths<B: Backend>(depths: Tensor<B, 3>) -> Tensor<B, 3> {
    // [1, 1, 1]
    let depths_max = depths
        .to_owned()
        .max()
        .clamp_min(f32::EPSILON)
        .unsqueeze::<3>();

    depths / depths_max
}

impl<B: Backend> fmt::Debug for CleanRender<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = B::name(&self.colors_rgb_2d.device());
        f.debug_struct(&format!("CleanRender<{name}>"))
            .field("colors_rgb_2d.dims()", &self.colors_rgb_2d.dims())
            .field("depths_2d.dims()", &self.depths_2d.dims())
            .field("radii.dims()", &self.radii.dims())
            .finish()
    }
}

impl<B: Backend> fmt::Debug for UnderwaterRender<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = B::name(&self.clean.colors_rgb_2d.device());
        f.debug_struct(&format!("UnderwaterRender<{name}>"))
            .field("clean", &self.clean)
            .field("maps", &self.maps)
            .finish()
    }
}
