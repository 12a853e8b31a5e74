#![allow(clippy::excessive_precision)]

pub mod camera;
pub mod compose;
pub mod error;
pub mod render;
pub mod scene;
pub mod spherical_harmonics;
