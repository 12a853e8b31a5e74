//! Spherical harmonics constants and host-side color evaluation.

use burn::tensor::{backend::Backend, Tensor};
use lazy_static::lazy_static;
use std::f64::consts::PI;

/// Maximum supported spherical harmonics degree.
pub const SH_DEGREE_MAX: u32 = 3;

/// Coefficient count per channel at [`SH_DEGREE_MAX`].
pub const SH_COUNT_MAX: usize = ((SH_DEGREE_MAX + 1) * (SH_DEGREE_MAX + 1)) as usize;

lazy_static! {
    /// The real coefficients of orthonormalized spherical harmonics from
    /// degree 0 to 3.
    ///
    /// `[[f64; 1], [f64; 3], [f64; 5], [f64; 7]]`
    pub static ref SH_C: Vec<Vec<f64>> = vec![
        vec![(1.0 / 4.0 / PI).sqrt()],
        vec![
            -(3.0 / 4.0 / PI).sqrt(),
            (3.0 / 4.0 / PI).sqrt(),
            -(3.0 / 4.0 / PI).sqrt(),
        ],
        vec![
            (15.0 / 4.0 / PI).sqrt(),
            -(15.0 / 4.0 / PI).sqrt(),
            (5.0 / 16.0 / PI).sqrt(),
            -(15.0 / 4.0 / PI).sqrt(),
            (15.0 / 16.0 / PI).sqrt(),
        ],
        vec![
            -(35.0 / 32.0 / PI).sqrt(),
            (105.0 / 4.0 / PI).sqrt(),
            -(21.0 / 32.0 / PI).sqrt(),
            (7.0 / 16.0 / PI).sqrt(),
            -(21.0 / 32.0 / PI).sqrt(),
            (105.0 / 16.0 / PI).sqrt(),
            -(35.0 / 32.0 / PI).sqrt(),
        ],
    ];
}

/// Evaluates spherical harmonics colors into RGB space.
///
/// The band-1 terms pair with the `y`, `z` and `x` direction components in
/// that order. The result is shifted by the `0.5` DC offset and clamped to be
/// non-negative, matching the approximate SH-to-RGB conversion of the
/// rasterization kernel.
///
/// ## Shapes
///
/// * `colors_sh` - `[P, M, 3]` where `M >= (degree + 1) ^ 2`
/// * `directions` - `[P, 3]`, normalized view directions
/// * Returns `[P, 3]`
pub fn evaluate_colors_sh<B: Backend>(
    colors_sh: Tensor<B, 3>,
    directions: Tensor<B, 2>,
    degree: u32,
) -> Tensor<B, 2> {
    let degree = degree.min(SH_DEGREE_MAX);
    // (D + 1) ^ 2
    let term_count = ((degree + 1) * (degree + 1)) as usize;

    // [P, 1, 1] * 3
    let mut directions = directions.unsqueeze_dim::<3>(2).iter_dim(1);
    let x = directions.next().expect("directions.dims()[1] == 3");
    let y = directions.next().expect("directions.dims()[1] == 3");
    let z = directions.next().expect("directions.dims()[1] == 3");

    // [P, 1, 3] * ((D + 1) ^ 2)
    let mut colors_sh = colors_sh.iter_dim(1).take(term_count);

    // [P, 1, 1] * 5
    let mut xx = None;
    let mut yy = None;
    let mut zz = None;
    let mut xy = None;
    let mut zz_5_1 = None;

    // [P, 1, 3] (D >= 0)
    let mut colors_rgb = colors_sh.next().expect("colors_sh.dims()[1] >= 1")
        * SH_C[0][0];

    // (D >= 1)
    if let Some(colors_sh) = colors_sh.next() {
        colors_rgb = colors_rgb + colors_sh * y.to_owned() * SH_C[1][0];
    }
    if let Some(colors_sh) = colors_sh.next() {
        colors_rgb = colors_rgb + colors_sh * z.to_owned() * SH_C[1][1];
    }
    if let Some(colors_sh) = colors_sh.next() {
        colors_rgb = colors_rgb + colors_sh * x.to_owned() * SH_C[1][2];
    }

    // (D >= 2)
    if let Some(colors_sh) = colors_sh.next() {
        let v = x.to_owned() * y.to_owned();
        colors_rgb = colors_rgb + colors_sh * v.to_owned() * SH_C[2][0];
        xy = Some(v);
    }
    if let Some(colors_sh) = colors_sh.next() {
        let v = y.to_owned() * z.to_owned();
        colors_rgb = colors_rgb + colors_sh * v * SH_C[2][1];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let v = z.to_owned() * z.to_owned();
        colors_rgb = colors_rgb + colors_sh * (v.to_owned() * 3.0 - 1.0) * SH_C[2][2];
        zz = Some(v);
    }
    if let Some(colors_sh) = colors_sh.next() {
        let v = x.to_owned() * z.to_owned();
        colors_rgb = colors_rgb + colors_sh * v * SH_C[2][3];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let vx = x.to_owned() * x.to_owned();
        let vy = y.to_owned() * y.to_owned();
        colors_rgb =
            colors_rgb + colors_sh * (vx.to_owned() - vy.to_owned()) * SH_C[2][4];
        xx = Some(vx);
        yy = Some(vy);
    }

    // (D >= 3)
    if let Some(colors_sh) = colors_sh.next() {
        let (xx, yy) = (
            xx.as_ref().expect("set by a lower band"),
            yy.as_ref().expect("set by a lower band"),
        );
        let v = y.to_owned() * (xx.to_owned() * 3.0 - yy.to_owned());
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][0];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let xy = xy.as_ref().expect("set by a lower band");
        let v = z.to_owned() * xy.to_owned();
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][1];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let zz = zz.as_ref().expect("set by a lower band");
        let v = zz.to_owned() * 5.0 - 1.0;
        colors_rgb = colors_rgb + colors_sh * y.to_owned() * v.to_owned() * SH_C[3][2];
        zz_5_1 = Some(v);
    }
    if let Some(colors_sh) = colors_sh.next() {
        let zz_5_1 = zz_5_1.as_ref().expect("set by a lower band");
        let v = z.to_owned() * (zz_5_1.to_owned() - 2.0);
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][3];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let zz_5_1 = zz_5_1.as_ref().expect("set by a lower band");
        let v = x.to_owned() * zz_5_1.to_owned();
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][4];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let (xx, yy) = (
            xx.as_ref().expect("set by a lower band"),
            yy.as_ref().expect("set by a lower band"),
        );
        let v = z.to_owned() * (xx.to_owned() - yy.to_owned());
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][5];
    }
    if let Some(colors_sh) = colors_sh.next() {
        let (xx, yy) = (
            xx.as_ref().expect("set by a lower band"),
            yy.as_ref().expect("set by a lower band"),
        );
        let v = x.to_owned() * (xx.to_owned() - yy.to_owned() * 3.0);
        colors_rgb = colors_rgb + colors_sh * v * SH_C[3][6];
    }

    // [P, 3]
    (colors_rgb + 0.5).clamp_min(0.0).squeeze::<2>(1)
}
