use thiserror::Error;

/// Why a single image could not be recompressed.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot encode JPEG: {0}")]
    Jpeg(#[source] image::ImageError),

    #[error("cannot encode PNG: {0}")]
    Png(#[from] png::EncodingError),

    #[error("image has no pixels")]
    Empty,
}
