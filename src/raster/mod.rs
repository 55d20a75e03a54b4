//! Raster image recompression.
//!
//! Images are recognised purely by file extension ([`ImageKind`]), decoded
//! with the `image` crate, reduced to an adaptive palette ([`quantize`]) and
//! written back in their original container format.

mod encode;
mod error;
mod kind;
mod quantize;

pub use encode::{encode_jpeg, encode_png};
pub use error::ConvertError;
pub use kind::ImageKind;
pub use quantize::{IndexedImage, quantize};

pub const DEFAULT_PALETTE_COLORS: usize = 256;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Knobs for the palette conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSettings {
    /// Palette size, 2..=256
    pub palette_colors: usize,
    /// JPEG quality, 1..=100
    pub jpeg_quality: u8,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            palette_colors: DEFAULT_PALETTE_COLORS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Decode `data`, convert it to an adaptive palette and re-encode it as
/// `kind`.
///
/// JPEG targets go through the palette as well and are expanded back to RGB
/// before encoding. [`ImageKind::NotImage`] returns the input unchanged.
pub fn recompress_image(
    data: &[u8],
    kind: ImageKind,
    settings: &ImageSettings,
) -> Result<Vec<u8>, ConvertError> {
    if kind == ImageKind::NotImage {
        return Ok(data.to_vec());
    }

    let image = image::load_from_memory(data).map_err(ConvertError::Decode)?;
    let indexed = quantize(&image, settings.palette_colors)?;

    match kind {
        ImageKind::Png => encode_png(&indexed),
        ImageKind::Jpeg => encode_jpeg(&indexed, settings.jpeg_quality),
        ImageKind::NotImage => unreachable!("non-images return early"),
    }
}
