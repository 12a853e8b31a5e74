//! 3DGS scene import implementation.

pub use super::*;

use burn::tensor::activation;
use humansize::{format_size, BINARY};
use std::{
    io::{BufRead, BufReader, Read},
    path::Path,
};

/// Directory holding one subdirectory per saved training iteration.
pub const POINT_CLOUD_DIR: &str = "point_cloud";
/// File name of the persisted cloud inside an iteration directory.
pub const POINT_CLOUD_FILE: &str = "point_cloud.ply";

/// Scene importers
impl<B: Backend> GaussianCloud<B> {
    /// Opens a persisted cloud from a model directory.
    ///
    /// The cloud is looked up at
    /// `<model_path>/point_cloud/iteration_<N>/point_cloud.ply`. When no
    /// iteration is requested, the highest available one is selected by
    /// scanning the sibling iteration directories.
    ///
    /// Returns the cloud and the resolved iteration.
    pub fn open(
        model_path: impl AsRef<Path>,
        iteration: Option<u32>,
        device: &B::Device,
    ) -> Result<(Self, u32), Error> {
        let point_cloud_dir = model_path.as_ref().join(POINT_CLOUD_DIR);

        let iteration = match iteration {
            Some(iteration) => iteration,
            None => {
                let names = std::fs::read_dir(&point_cloud_dir)
                    .map_err(|error| {
                        Error::AssetLoad(format!("{point_cloud_dir:?}: {error}"))
                    })?
                    .filter_map(|entry| {
                        Some(entry.ok()?.file_name().to_str()?.to_owned())
                    })
                    .collect::<Vec<_>>();
                max_iteration(&names).ok_or_else(|| {
                    Error::AssetLoad(format!(
                        "no iteration directories in {point_cloud_dir:?}",
                    ))
                })?
            },
        };

        let path = point_cloud_dir
            .join(format!("iteration_{iteration}"))
            .join(POINT_CLOUD_FILE);
        let mut reader = std::fs::File::open(&path).map_err(|error| {
            Error::AssetLoad(format!("{path:?}: {error}"))
        })?;

        let cloud = Self::decode_polygon(&mut reader, device)?;

        log::info!(
            target: "seasplat_renderer::scene",
            "open > iteration {iteration}, {} points, {}",
            cloud.point_count(),
            format_size(cloud.size(), BINARY),
        );

        Ok((cloud, iteration))
    }

    /// Imports the cloud in the 3DGS PLY format (binary little-endian).
    ///
    /// The PLY opacities, scalings and rotations are stored pre-activation;
    /// sigmoid, exp and quaternion normalization are applied here, and the
    /// quaternions are reordered from scalar-first to scalar-last.
    pub fn decode_polygon(
        reader: &mut impl Read,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let reader = &mut BufReader::new(reader);

        let header = PolygonHeader::decode(reader)?;
        // P
        let point_count = header.point_count;
        // (D + 1) ^ 2
        let sh_count = header.sh_count()?;
        let sh_degree = (sh_count as f64).sqrt() as u32 - 1;
        // C
        let channel_count = header.properties.len();

        let mut bytes = vec![0; point_count * channel_count * size_of::<f32>()];
        reader.read_exact(&mut bytes).map_err(|error| {
            Error::AssetLoad(format!("truncated polygon payload: {error}"))
        })?;
        // [P * C]
        let values = bytemuck::pod_collect_to_vec::<u8, f32>(&bytes);

        let take_tensor = |names: &[String]| -> Result<Tensor<B, 2>, Error> {
            let mut column = Vec::with_capacity(point_count * names.len());
            for name in names {
                let index = header.property_index(name)?;
                column.extend(
                    (0..point_count).map(|point| values[point * channel_count + index]),
                );
            }
            // [P, N] <- [N, P]
            Ok(Tensor::from_data(
                TensorData::new(column, [names.len(), point_count]),
                device,
            )
            .swap_dims(0, 1))
        };

        // [P, M * 3] <- [P, 1, 3] + [P, 3, M - 1]
        let colors_sh = take_tensor(
            &(0..sh_count * 3)
                .map(|i| {
                    if i < 3 {
                        format!("f_dc_{i}")
                    } else {
                        let i = i / 3 + (i % 3) * (sh_count - 1) - 1;
                        format!("f_rest_{i}")
                    }
                })
                .collect::<Vec<_>>(),
        )?
        .reshape([point_count, sh_count, 3]);
        // [P, 1]
        let opacities =
            activation::sigmoid(take_tensor(&["opacity".into()])?);
        // [P, 3]
        let positions = take_tensor(&["x", "y", "z"].map(Into::into))?;
        // [P, 4] (x, y, z, w) <- (w, x, y, z)
        let rotations = {
            let rotations =
                take_tensor(&[1, 2, 3, 0].map(|i| format!("rot_{i}")))?;
            rotations.to_owned().div(
                rotations
                    .powf_scalar(2.0)
                    .sum_dim(1)
                    .sqrt()
                    .clamp_min(f32::EPSILON),
            )
        };
        // [P, 3]
        let scalings = take_tensor(
            &(0..3).map(|i| format!("scale_{i}")).collect::<Vec<_>>(),
        )?
        .exp();

        #[cfg(debug_assertions)]
        log::debug!(
            target: "seasplat_renderer::scene",
            "decode_polygon > {point_count} points, sh_degree {sh_degree}",
        );

        Self::new(colors_sh, opacities, positions, rotations, scalings, sh_degree)
    }
}

/// Picks the maximum integer suffix among `iteration_<N>` names.
pub fn max_iteration<S: AsRef<str>>(names: &[S]) -> Option<u32> {
    names
        .iter()
        .filter_map(|name| name.as_ref().rsplit('_').next()?.parse().ok())
        .max()
}

/// The decoded header of a binary little-endian 3DGS polygon file.
#[derive(Clone, Debug, PartialEq)]
pub struct PolygonHeader {
    pub point_count: usize,
    /// Vertex property names in payload order. All are `float`.
    pub properties: Vec<String>,
}

impl PolygonHeader {
    pub fn decode(reader: &mut impl BufRead) -> Result<Self, Error> {
        let mut line = String::new();
        let mut read_line = |line: &mut String| -> Result<(), Error> {
            line.clear();
            if reader.read_line(line)? == 0 {
                return Err(Error::AssetLoad(
                    "unterminated polygon header".into(),
                ));
            }
            Ok(())
        };

        read_line(&mut line)?;
        if line.trim_end() != "ply" {
            return Err(Error::AssetLoad("not a polygon file".into()));
        }

        let mut point_count = None;
        let mut properties = vec![];
        loop {
            read_line(&mut line)?;
            let mut words = line.split_whitespace();
            match words.next() {
                Some("format") => {
                    if words.next() != Some("binary_little_endian") {
                        return Err(Error::AssetLoad(
                            "the polygon format should be binary_little_endian"
                                .into(),
                        ));
                    }
                },
                Some("element") => {
                    if words.next() != Some("vertex") {
                        return Err(Error::AssetLoad(
                            "the polygon element should be vertex".into(),
                        ));
                    }
                    point_count = words
                        .next()
                        .and_then(|count| count.parse().ok());
                },
                Some("property") => {
                    if words.next() != Some("float") {
                        return Err(Error::AssetLoad(
                            "the polygon properties should be float".into(),
                        ));
                    }
                    if let Some(name) = words.next() {
                        properties.push(name.to_owned());
                    }
                },
                Some("comment") => {},
                Some("end_header") => break,
                _ => {
                    return Err(Error::AssetLoad(format!(
                        "unexpected polygon header line: {line:?}",
                    )))
                },
            }
        }

        let point_count = point_count.ok_or_else(|| {
            Error::AssetLoad("the polygon header has no vertex element".into())
        })?;

        Ok(Self {
            point_count,
            properties,
        })
    }

    pub fn property_index(
        &self,
        name: &str,
    ) -> Result<usize, Error> {
        self.properties
            .iter()
            .position(|property| property == name)
            .ok_or_else(|| {
                Error::AssetLoad(format!("missing polygon property {name:?}"))
            })
    }

    /// The SH coefficient count per channel derived from the `f_rest` count.
    pub fn sh_count(&self) -> Result<usize, Error> {
        let rest_count = self
            .properties
            .iter()
            .filter(|name| name.starts_with("f_rest_"))
            .count();
        let sh_count = rest_count / 3 + 1;

        let degree_valid = rest_count % 3 == 0
            && (1..=4).any(|degree| degree * degree == sh_count);
        if !degree_valid {
            return Err(Error::AssetLoad(format!(
                "{rest_count} f_rest properties do not form a full SH degree",
            )));
        }
        Ok(sh_count)
    }
}
