//! Attenuation half of the underwater medium model.

pub use super::*;
pub use burn::nn::conv::Conv2d;

use burn::{
    nn::conv::Conv2dConfig,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::activation,
};

/// The configuration for [`AttenuationNet`]
#[derive(Config, Copy, Debug)]
pub struct AttenuationNetConfig {
    /// Depth input channels.
    #[config(default = 1)]
    pub channels_input: usize,
    /// Attenuation output channels.
    #[config(default = 1)]
    pub channels_output: usize,
}

/// Depth-driven attenuation of the direct signal.
///
/// `directs = colors * exp(-ReLU(conv(depths)))`
///
/// The convolution is pointwise and bias-free, so a zero depth attenuates
/// nothing.
#[derive(Debug, Module)]
pub struct AttenuationNet<B: Backend> {
    pub conv: Conv2d<B>,
}

impl AttenuationNetConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> AttenuationNet<B> {
        let conv = Conv2dConfig::new(
            [self.channels_input, self.channels_output],
            [1, 1],
        )
        .with_bias(false)
        .init(device);
        AttenuationNet { conv }
    }
}

impl<B: Backend> AttenuationNet<B> {
    /// Loads the trained parameters from a record file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] when the record is missing or malformed.
    pub fn load(
        file_path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let record: AttenuationNetRecord<B> =
            NamedMpkFileRecorder::<FullPrecisionSettings>::default()
                .load(file_path.as_ref().to_owned(), device)?;
        Ok(AttenuationNetConfig::new().init(device).load_record(record))
    }
}

impl<B: Backend> AttenuationModel<B> for AttenuationNet<B> {
    fn forward(
        &self,
        colors: Tensor<B, 4>,
        depths: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        // [1, 1, I_y, I_x]
        let coefficients = activation::relu(self.conv.forward(depths));
        let attenuations = (-coefficients).exp();
        // [1, 3, I_y, I_x]
        let directs = colors * attenuations.to_owned();
        (directs, attenuations)
    }
}

impl Default for AttenuationNetConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
