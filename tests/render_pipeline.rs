//! End-to-end render orchestration tests on the ndarray backend.

use burn::{
    backend::NdArray,
    tensor::{Tensor, TensorData},
};
use nalgebra::Matrix3x4;
use seasplat_renderer::{
    camera::{CameraAdapter, CameraPose},
    compose::{AttenuationModel, BackscatterModel, UnderwaterCompositor},
    error::Error,
    render::{
        BackgroundColor, RasterInput, RasterOutput, RasterSettings, Rasterizer,
        ReferenceRasterizer, RenderOptions, RenderOutput, SplatRenderer,
    },
    scene::GaussianCloud,
};

type B = NdArray<f32>;

/// Replays canned kernel outputs, ignoring the Gaussians.
#[derive(Clone, Debug)]
struct MockRasterizer {
    colors: Vec<f32>,
    depths: Vec<f32>,
    radii: Vec<i32>,
}

impl Rasterizer<B> for MockRasterizer {
    fn rasterize(
        &self,
        input: RasterInput<B>,
        settings: &RasterSettings,
    ) -> Result<RasterOutput<B>, Error> {
        let device = input.positions.device();
        let image_height = settings.image_height as usize;
        let image_width = settings.image_width as usize;
        Ok(RasterOutput {
            colors_rgb_2d: Tensor::from_data(
                TensorData::new(
                    self.colors.clone(),
                    [3, image_height, image_width],
                ),
                &device,
            ),
            depths_2d: Tensor::from_data(
                TensorData::new(
                    self.depths.clone(),
                    [1, image_height, image_width],
                ),
                &device,
            ),
            radii: Tensor::from_data(
                TensorData::new(self.radii.clone(), [self.radii.len()]),
                &device,
            ),
        })
    }
}

/// `attenuations = exp(-depths)`
#[derive(Clone, Copy, Debug)]
struct MockAttenuation;

impl AttenuationModel<B> for MockAttenuation {
    fn forward(
        &self,
        colors: Tensor<B, 4>,
        depths: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let attenuations = (-depths).exp();
        (colors * attenuations.to_owned(), attenuations)
    }
}

/// `backscatters = 1 - exp(-depths)` on every channel.
#[derive(Clone, Copy, Debug)]
struct MockBackscatter;

impl BackscatterModel<B> for MockBackscatter {
    fn forward(
        &self,
        depths: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        (-(-depths).exp() + 1.0).repeat_dim(1, 3)
    }
}

fn pose(image_size: u32) -> CameraPose {
    CameraPose {
        camera_to_world: Matrix3x4::identity(),
        focal_length_x: image_size as f64 / 2.0,
        focal_length_y: image_size as f64 / 2.0,
        image_width: image_size,
        image_height: image_size,
    }
}

fn single_gaussian_cloud() -> GaussianCloud<B> {
    let device = Default::default();
    GaussianCloud::new(
        Tensor::from_data([[[1.0, 0.0, 0.0]]], &device),
        Tensor::from_data([[1.0]], &device),
        Tensor::from_data([[0.0, 0.0, 0.0]], &device),
        Tensor::from_data([[0.0, 0.0, 0.0, 1.0]], &device),
        Tensor::from_data([[1.0, 1.0, 1.0]], &device),
        0,
    )
    .unwrap()
}

fn empty_cloud() -> GaussianCloud<B> {
    let device = Default::default();
    GaussianCloud::new(
        Tensor::zeros([0, 1, 3], &device),
        Tensor::zeros([0, 1], &device),
        Tensor::zeros([0, 3], &device),
        Tensor::zeros([0, 4], &device),
        Tensor::zeros([0, 3], &device),
        0,
    )
    .unwrap()
}

#[test]
fn clean_render_post_processes_the_kernel_outputs() {
    let rasterizer = MockRasterizer {
        // Out-of-range values the kernel may produce.
        colors: vec![
            1.5, 0.25, -0.5, 0.75, //
            1.5, 0.25, -0.5, 0.75, //
            1.5, 0.25, -0.5, 0.75,
        ],
        depths: vec![10.0, 5.0, 10.0, 0.0],
        radii: vec![3],
    };
    let renderer = SplatRenderer::new(CameraAdapter::default(), rasterizer);

    let output = renderer
        .render(&pose(2), &single_gaussian_cloud(), &RenderOptions::new())
        .unwrap();

    let clean = match output {
        RenderOutput::Clean(clean) => clean,
        RenderOutput::Underwater(_) => panic!("no compositor was configured"),
    };

    let visibilities = clean
        .visibilities()
        .into_data()
        .to_vec::<bool>()
        .unwrap();
    assert_eq!(visibilities, vec![true]);

    // Channels-last and clamped into the displayable range.
    assert_eq!(clean.colors_rgb_2d.dims(), [2, 2, 3]);
    let colors = clean
        .colors_rgb_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(colors[0], 1.0);
    assert_eq!(colors[3], 0.25);
    assert_eq!(colors[6], 0.0);

    // Depths normalized by the frame maximum, raw depths kept.
    let depths_normalized = clean
        .depths_normalized_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert_eq!(depths_normalized, vec![1.0, 0.5, 1.0, 0.0]);
    let depths = clean.depths_2d.into_data().to_vec::<f32>().unwrap();
    assert_eq!(depths, vec![10.0, 5.0, 10.0, 0.0]);
}

#[test]
fn underwater_render_composites_the_raw_images() {
    let rasterizer = MockRasterizer {
        // Raw radiance above 1.0 must reach the medium model unclamped.
        colors: vec![2.0; 12],
        depths: vec![2.0; 4],
        radii: vec![1],
    };
    let renderer = SplatRenderer::new(CameraAdapter::default(), rasterizer)
        .with_compositor(UnderwaterCompositor::new(
            Box::new(MockAttenuation),
            Box::new(MockBackscatter),
        ));

    let output = renderer
        .render(&pose(2), &single_gaussian_cloud(), &RenderOptions::new())
        .unwrap();

    let underwater = match output {
        RenderOutput::Underwater(underwater) => underwater,
        RenderOutput::Clean(_) => panic!("a compositor was configured"),
    };

    // directs = 2.0 * exp(-2), not clamp(2.0) * exp(-2)
    let attenuation = (-2.0f32).exp();
    let directs = underwater
        .maps
        .directs_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    for value in directs {
        approx::assert_relative_eq!(value, 2.0 * attenuation, epsilon = 1e-6);
    }

    let backscatters = underwater
        .maps
        .backscatters_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    for value in backscatters {
        approx::assert_relative_eq!(value, 1.0 - attenuation, epsilon = 1e-6);
    }

    // underwater = clamp(directs + backscatters)
    let target = (2.0 * attenuation + (1.0 - attenuation)).clamp(0.0, 1.0);
    let colors_underwater = underwater
        .maps
        .colors_underwater_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    for value in colors_underwater {
        approx::assert_relative_eq!(value, target, epsilon = 1e-6);
    }

    assert_eq!(underwater.maps.attenuations_2d.dims(), [2, 2, 1]);

    // The clean render is post-processed as usual next to the maps.
    let colors = underwater
        .clean
        .colors_rgb_2d
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(colors.iter().all(|value| *value == 1.0));
}

#[test]
fn empty_cloud_renders_the_background() {
    let renderer =
        SplatRenderer::new(CameraAdapter::default(), ReferenceRasterizer);
    let options = RenderOptions::new()
        .with_background(BackgroundColor::White);

    let output = renderer.render(&pose(4), &empty_cloud(), &options).unwrap();
    let clean = output.clean();

    assert_eq!(clean.radii.dims(), [0]);
    let colors = clean
        .colors_rgb_2d
        .to_owned()
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(colors.iter().all(|value| *value == 1.0));
    let depths = clean
        .depths_normalized_2d
        .to_owned()
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(depths.iter().all(|value| *value == 0.0));
}

#[test]
fn gaussian_at_the_camera_center_is_culled() {
    let renderer =
        SplatRenderer::new(CameraAdapter::default(), ReferenceRasterizer);
    let options = RenderOptions::new()
        .with_background(BackgroundColor::White);

    let output = renderer
        .render(&pose(4), &single_gaussian_cloud(), &options)
        .unwrap();
    let clean = output.clean();

    let visibilities = clean
        .visibilities()
        .into_data()
        .to_vec::<bool>()
        .unwrap();
    assert_eq!(visibilities, vec![false]);
    let colors = clean
        .colors_rgb_2d
        .to_owned()
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    assert!(colors.iter().all(|value| *value == 1.0));
}

#[test]
fn degenerate_pose_is_rejected_before_rasterization() {
    let renderer =
        SplatRenderer::new(CameraAdapter::default(), ReferenceRasterizer);
    let mut pose = pose(4);
    pose.camera_to_world[(0, 0)] = f64::NAN;

    let output =
        renderer.render(&pose, &single_gaussian_cloud(), &RenderOptions::new());
    assert!(matches!(output, Err(Error::DegenerateCamera(_))));
}
