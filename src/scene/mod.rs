pub mod gaussian_3d;

pub use gaussian_3d::*;
