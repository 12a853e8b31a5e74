//! Backscatter half of the underwater medium model.

pub use super::*;

use burn::{
    nn::conv::Conv2dConfig,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::activation,
};

/// The configuration for [`BackscatterNet`]
#[derive(Config, Copy, Debug)]
pub struct BackscatterNetConfig {
    /// Depth input channels.
    #[config(default = 1)]
    pub channels_input: usize,
    /// Backscatter output channels.
    #[config(default = 3)]
    pub channels_output: usize,
}

/// Depth-driven veiling light.
///
/// `backscatters = B_inf * (1 - exp(-ReLU(conv_b(depths))))
///              + J' * exp(-ReLU(conv_r(depths)))`
///
/// `B_inf` and `J'` are per-channel limits bounded by a sigmoid, so the
/// backscatter never exceeds two in any channel.
#[derive(Debug, Module)]
pub struct BackscatterNet<B: Backend> {
    pub conv_backscatter: Conv2d<B>,
    pub conv_residual: Conv2d<B>,
    /// `[1, 3, 1, 1]`, the veiling light at infinite depth (pre-sigmoid).
    pub backscatter_limit: Param<Tensor<B, 4>>,
    /// `[1, 3, 1, 1]`, the near-field residual light (pre-sigmoid).
    pub residual_limit: Param<Tensor<B, 4>>,
}

impl BackscatterNetConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> BackscatterNet<B> {
        let channels = [self.channels_input, self.channels_output];
        let conv_backscatter = Conv2dConfig::new(channels, [1, 1])
            .with_bias(false)
            .init(device);
        let conv_residual = Conv2dConfig::new(channels, [1, 1])
            .with_bias(false)
            .init(device);
        let limits = [1, self.channels_output, 1, 1];
        BackscatterNet {
            conv_backscatter,
            conv_residual,
            backscatter_limit: Param::from_tensor(Tensor::zeros(limits, device)),
            residual_limit: Param::from_tensor(Tensor::zeros(limits, device)),
        }
    }
}

impl<B: Backend> BackscatterNet<B> {
    /// Loads the trained parameters from a record file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] when the record is missing or malformed.
    pub fn load(
        file_path: impl AsRef<Path>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let record: BackscatterNetRecord<B> =
            NamedMpkFileRecorder::<FullPrecisionSettings>::default()
                .load(file_path.as_ref().to_owned(), device)?;
        Ok(BackscatterNetConfig::new().init(device).load_record(record))
    }
}

impl<B: Backend> BackscatterModel<B> for BackscatterNet<B> {
    fn forward(
        &self,
        depths: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        // [1, 3, I_y, I_x]
        let saturation = -(-activation::relu(
            self.conv_backscatter.forward(depths.to_owned()),
        ))
        .exp()
            + 1.0;
        let residual_decay =
            (-activation::relu(self.conv_residual.forward(depths))).exp();

        activation::sigmoid(self.backscatter_limit.val()) * saturation
            + activation::sigmoid(self.residual_limit.val()) * residual_decay
    }
}

impl Default for BackscatterNetConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
