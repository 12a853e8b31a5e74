//! Underwater image formation on top of a rendered frame.
//!
//! The revised image formation model splits the observed signal into an
//! attenuated direct component and an additive backscatter component:
//! `I = J * exp(-a(z)) + B * (1 - exp(-b(z)))`.

pub mod attenuation;
pub mod backscatter;

pub use crate::error::Error;
pub use attenuation::*;
pub use backscatter::*;
pub use burn::{
    config::Config,
    module::{Module, Param},
    tensor::{backend::Backend, Tensor},
};

use std::{fmt, path::Path};

/// The attenuation half of the medium model.
///
/// Models are `Send` but not `Sync` (burn module params initialize lazily),
/// so concurrent renders each own their compositor.
pub trait AttenuationModel<B: Backend>: Send + fmt::Debug {
    /// Attenuates the direct signal by the water column.
    ///
    /// ## Shapes
    ///
    /// * `colors` - `[1, 3, I_y, I_x]`
    /// * `depths` - `[1, 1, I_y, I_x]`
    /// * Returns the directs `[1, 3, I_y, I_x]` and the attenuations
    ///   `[1, 1, I_y, I_x]`
    fn forward(
        &self,
        colors: Tensor<B, 4>,
        depths: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>);
}

/// The backscatter half of the medium model.
pub trait BackscatterModel<B: Backend>: Send + fmt::Debug {
    /// Veiling light scattered into the view path.
    ///
    /// ## Shapes
    ///
    /// * `depths` - `[1, 1, I_y, I_x]`
    /// * Returns `[1, 3, I_y, I_x]`
    fn forward(
        &self,
        depths: Tensor<B, 4>,
    ) -> Tensor<B, 4>;
}

/// Composites a rendered frame through the underwater medium.
pub struct UnderwaterCompositor<B: Backend> {
    attenuation: Box<dyn AttenuationModel<B>>,
    backscatter: Box<dyn BackscatterModel<B>>,
}

/// The intermediate and final images of the underwater pass.
///
/// All maps are in `[I_y, I_x, C]` order.
#[derive(Clone)]
pub struct UnderwaterImage<B: Backend> {
    /// `[I_y, I_x, 3]`, in `0.0` to `1.0`
    pub colors_underwater_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 3]`
    pub directs_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 3]`
    pub backscatters_2d: Tensor<B, 3>,
    /// `[I_y, I_x, 1]`
    pub attenuations_2d: Tensor<B, 3>,
}

impl<B: Backend> UnderwaterCompositor<B> {
    #[inline]
    pub fn new(
        attenuation: Box<dyn AttenuationModel<B>>,
        backscatter: Box<dyn BackscatterModel<B>>,
    ) -> Self {
        Self {
            attenuation,
            backscatter,
        }
    }

    /// Loads both medium models from their record files.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] when a record is missing or malformed.
    pub fn open(
        attenuation_model_path: impl AsRef<Path>,
        backscatter_model_path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        log::info!(
            target: "seasplat_renderer::compose",
            "UnderwaterCompositor::open > {:?} and {:?}",
            attenuation_model_path.as_ref(),
            backscatter_model_path.as_ref(),
        );

        Ok(Self::new(
            Box::new(AttenuationNet::load(attenuation_model_path, device)?),
            Box::new(BackscatterNet::load(backscatter_model_path, device)?),
        ))
    }

    /// Composites the raw rendered color and depth images.
    ///
    /// The final image is `clamp(directs + backscatters, 0.0, 1.0)`.
    ///
    /// ## Shapes
    ///
    /// * `colors_rgb_2d` - `[3, I_y, I_x]`
    /// * `depths_2d` - `[1, I_y, I_x]`
    pub fn compose(
        &self,
        colors_rgb_2d: Tensor<B, 3>,
        depths_2d: Tensor<B, 3>,
    ) -> UnderwaterImage<B> {
        // [1, 3, I_y, I_x]
        let colors = colors_rgb_2d.unsqueeze::<4>();
        // [1, 1, I_y, I_x]
        let depths = depths_2d.unsqueeze::<4>();

        let (directs, attenuations) =
            self.attenuation.forward(colors, depths.to_owned());
        // [1, 3, I_y, I_x]
        let backscatters = self.backscatter.forward(depths);
        let colors_underwater =
            (directs.to_owned() + backscatters.to_owned()).clamp(0.0, 1.0);

        UnderwaterImage {
            colors_underwater_2d: into_image(colors_underwater),
            directs_2d: into_image(directs),
            backscatters_2d: into_image(backscatters),
            attenuations_2d: into_image(attenuations),
        }
    }
}

/// Drops the batch dimension and moves the channels last.
fn into_image<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 3> {
    tensor.squeeze::<3>(0).permute([1, 2, 0])
}

impl<B: Backend> fmt::Debug for UnderwaterCompositor<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("UnderwaterCompositor")
            .field("attenuation", &self.attenuation)
            .field("backscatter", &self.backscatter)
            .finish()
    }
}

impl<B: Backend> fmt::Debug for UnderwaterImage<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = B::name(&self.colors_underwater_2d.device());
        f.debug_struct(&format!("UnderwaterImage<{name}>"))
            .field(
                "colors_underwater_2d.dims()",
                &self.colors_underwater_2d.dims(),
            )
            .field("directs_2d.dims()", &self.directs_2d.dims())
            .field("backscatters_2d.dims()", &self.backscatters_2d.dims())
            .field("attenuations_2d.dims()", &self.attenuations_2d.dims())
            .finish()
    }
}
