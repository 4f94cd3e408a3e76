//! Mutual information matching cost for semi-global stereo matching.
//!
//! Semi-global matching aggregates a per-pixel matching cost along scanline
//! paths. This crate provides the mutual information cost function from
//! Hirschmuller's SGM paper: it learns a joint model of left/right pixel
//! intensities from a prior disparity map, then answers cheap per-pixel
//! cost queries that stay meaningful when the two cameras disagree on
//! exposure or illumination.
//!
//! ```no_run
//! use sgm_mi_rs::StereoMutualInformation;
//!
//! # fn run(left: &image::GrayImage, right: &image::GrayImage,
//! #        disparity: &image::GrayImage) -> Result<(), sgm_mi_rs::MutualInfoError> {
//! let mut mi = StereoMutualInformation::new();
//! mi.configure_smoothing(3);
//! mi.process(left, right, 0, disparity, 255)?;
//! mi.precompute_scaled_cost(2047);
//! let c = mi.cost_scaled(100, 104);
//! # let _ = c; Ok(())
//! # }
//! ```

pub mod error;
pub mod kernel;
pub mod mutual_info;

pub use crate::error::MutualInfoError;
pub use crate::kernel::SmoothingKernel;
pub use crate::mutual_info::StereoMutualInformation;
