pub mod import;

pub use crate::error::Error;
pub use burn::tensor::{backend::Backend, Tensor, TensorData};

use std::fmt;

/// An ordered collection of anisotropic 3D Gaussians.
///
/// Loaded once at startup and read-only for the rest of the process
/// lifetime, so concurrent renders against the same cloud need no locking.
#[derive(Clone)]
pub struct GaussianCloud<B: Backend> {
    /// `[P, M, 3]` where `M == (sh_degree + 1) ^ 2`
    colors_sh: Tensor<B, 3>,
    /// `[P, 1]`
    ///
    /// They range from `0.0` to `1.0`.
    opacities: Tensor<B, 2>,
    /// `[P, 3]`
    positions: Tensor<B, 2>,
    /// `[P, 4]`
    ///
    /// They are represented as normalized Hamilton quaternions in scalar-last
    /// order, i.e., `[x, y, z, w]`.
    rotations: Tensor<B, 2>,
    /// `[P, 3]`, positive
    scalings: Tensor<B, 2>,
    /// Active spherical harmonics degree.
    sh_degree: u32,
}

impl<B: Backend> GaussianCloud<B> {
    /// Builds a cloud from activated property tensors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetLoad`] when the tensor shapes disagree or the SH
    /// coefficient count does not match `(sh_degree + 1) ^ 2` per channel.
    pub fn new(
        colors_sh: Tensor<B, 3>,
        opacities: Tensor<B, 2>,
        positions: Tensor<B, 2>,
        rotations: Tensor<B, 2>,
        scalings: Tensor<B, 2>,
        sh_degree: u32,
    ) -> Result<Self, Error> {
        // P
        let point_count = positions.dims()[0];
        // (D + 1) ^ 2
        let sh_count = ((sh_degree + 1) * (sh_degree + 1)) as usize;

        if colors_sh.dims() != [point_count, sh_count, 3] {
            return Err(Error::AssetLoad(format!(
                "colors_sh has shape {:?}, expected {:?}",
                colors_sh.dims(),
                [point_count, sh_count, 3],
            )));
        }
        for (name, dims, target) in [
            ("opacities", opacities.dims(), [point_count, 1]),
            ("positions", positions.dims(), [point_count, 3]),
            ("rotations", rotations.dims(), [point_count, 4]),
            ("scalings", scalings.dims(), [point_count, 3]),
        ] {
            if dims != target {
                return Err(Error::AssetLoad(format!(
                    "{name} has shape {dims:?}, expected {target:?}",
                )));
            }
        }

        Ok(Self {
            colors_sh,
            opacities,
            positions,
            rotations,
            scalings,
            sh_degree,
        })
    }
}

/// Property value getters
impl<B: Backend> GaussianCloud<B> {
    /// Colors in SH space.
    ///
    /// The shape is `[P, M, 3]` with `M == (sh_degree + 1) ^ 2`.
    #[inline]
    pub fn colors_sh(&self) -> Tensor<B, 3> {
        self.colors_sh.to_owned()
    }

    /// Opacities.
    ///
    /// The shape is `[P, 1]`.
    #[inline]
    pub fn opacities(&self) -> Tensor<B, 2> {
        self.opacities.to_owned()
    }

    /// 3D positions.
    ///
    /// The shape is `[P, 3]`.
    #[inline]
    pub fn positions(&self) -> Tensor<B, 2> {
        self.positions.to_owned()
    }

    /// Rotations.
    ///
    /// The shape is `[P, 4]`.
    #[inline]
    pub fn rotations(&self) -> Tensor<B, 2> {
        self.rotations.to_owned()
    }

    /// 3D scalings.
    ///
    /// The shape is `[P, 3]`.
    #[inline]
    pub fn scalings(&self) -> Tensor<B, 2> {
        self.scalings.to_owned()
    }

    /// Active spherical harmonics degree.
    #[inline]
    pub const fn sh_degree(&self) -> u32 {
        self.sh_degree
    }

    /// The number of Gaussians.
    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    /// The device where the cloud resides.
    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }

    /// The size of the cloud in bytes.
    pub fn size(&self) -> usize {
        [
            self.colors_sh.dims().iter().product::<usize>(),
            self.opacities.dims().iter().product(),
            self.positions.dims().iter().product(),
            self.rotations.dims().iter().product(),
            self.scalings.dims().iter().product(),
        ]
        .iter()
        .sum::<usize>()
            * size_of::<f32>()
    }
}

/// Derived values
impl<B: Backend> GaussianCloud<B> {
    /// Precomputed 3D covariances from scalings and rotations.
    ///
    /// The shape is `[P, 3, 3]` (symmetric).
    #[inline]
    pub fn covariances(
        &self,
        scaling_modifier: f64,
    ) -> Tensor<B, 3> {
        covariances_3d(self.scalings(), self.rotations(), scaling_modifier)
    }
}

/// 3D covariances from scalings and rotations.
///
/// `Σ = (R S) (R S)ᵀ` with the scaling modifier folded into `S`.
///
/// ## Shapes
///
/// * `scalings` - `[P, 3]`
/// * `rotations` - `[P, 4]`, normalized scalar-last quaternions
/// * Returns `[P, 3, 3]` (symmetric)
pub fn covariances_3d<B: Backend>(
    scalings: Tensor<B, 2>,
    rotations: Tensor<B, 2>,
    scaling_modifier: f64,
) -> Tensor<B, 3> {
    // P
    let point_count = scalings.dims()[0];

    // [P, 3, 3]
    let rotations = {
        // [P, 1] * 4 ([x, y, z, w])
        let mut r = rotations.iter_dim(1);
        let r = (
            r.next().expect("rotations.dims()[1] == 4"),
            r.next().expect("rotations.dims()[1] == 4"),
            r.next().expect("rotations.dims()[1] == 4"),
            r.next().expect("rotations.dims()[1] == 4"),
        );

        // [P, 1] * 9
        let x_y = r.0.to_owned() * r.1.to_owned() * 2.0;
        let x_z = r.0.to_owned() * r.2.to_owned() * 2.0;
        let x_w = r.0.to_owned() * r.3.to_owned() * 2.0;
        let y_y = r.1.to_owned() * r.1.to_owned() * 2.0;
        let y_z = r.1.to_owned() * r.2.to_owned() * 2.0;
        let y_w = r.1.to_owned() * r.3.to_owned() * 2.0;
        let z_z = r.2.to_owned() * r.2.to_owned() * 2.0;
        let z_w = r.2.to_owned() * r.3.to_owned() * 2.0;
        let x_x = r.0.to_owned() * r.0 * 2.0;

        // [P, 3, 3]
        Tensor::cat(
            vec![
                -y_y.to_owned() - z_z.to_owned() + 1.0,
                x_y.to_owned() - z_w.to_owned(),
                x_z.to_owned() + y_w.to_owned(),
                x_y + z_w,
                -x_x.to_owned() - z_z + 1.0,
                y_z.to_owned() - x_w.to_owned(),
                x_z - y_w,
                y_z + x_w,
                -x_x - y_y + 1.0,
            ],
            1,
        )
        .reshape([point_count, 3, 3])
    };

    // [P, 1, 3]
    let scalings = (scalings * scaling_modifier).reshape([point_count, 1, 3]);

    // [P, 3, 3] = [P, 3, 3] * [P, 1, 3]
    let transforms = rotations * scalings;

    // [P, 3, 3] = [P, 3, 3] * [P, 3, 3]
    transforms.to_owned().matmul(transforms.transpose())
}

impl<B: Backend> fmt::Debug for GaussianCloud<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("GaussianCloud")
            .field("device", &self.device())
            .field("colors_sh.dims()", &self.colors_sh.dims())
            .field("opacities.dims()", &self.opacities.dims())
            .field("positions.dims()", &self.positions.dims())
            .field("rotations.dims()", &self.rotations.dims())
            .field("scalings.dims()", &self.scalings.dims())
            .field("sh_degree", &self.sh_degree)
            .finish()
    }
}
