use thiserror::Error;

/// Fatal errors raised while training the mutual information model.
///
/// All three variants abort the current call with no partial results; the
/// internal tables keep whatever the previous successful `process` produced.
/// Callers that hit `NoValidCorrespondences` typically fall back to a
/// non-MI cost metric until a usable disparity map is available.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutualInfoError {
    #[error("histogram resolution {max_histogram_value} exceeds pixel resolution {max_pixel_value}")]
    HistogramExceedsPixelRange {
        max_pixel_value: u32,
        max_histogram_value: u32,
    },
    #[error("image shapes differ: left {left:?}, right {right:?}, disparity {disparity:?}")]
    ShapeMismatch {
        left: (u32, u32),
        right: (u32, u32),
        disparity: (u32, u32),
    },
    #[error("disparity map contains no valid correspondences")]
    NoValidCorrespondences,
}

pub type Result<T> = std::result::Result<T, MutualInfoError>;
