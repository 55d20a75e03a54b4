use color_quant::NeuQuant;
use image::DynamicImage;

use super::ConvertError;

/// NeuQuant sampling factor: 1 is slowest and best, 30 fastest.
const SAMPLE_FACTOR: i32 = 10;

/// A palette image: one palette index per pixel, row-major.
#[derive(Debug, Clone)]
pub struct IndexedImage {
    pub width: u32,
    pub height: u32,
    /// RGBA palette entries
    pub palette: Vec<[u8; 4]>,
    pub indices: Vec<u8>,
}

impl IndexedImage {
    pub fn has_transparency(&self) -> bool {
        self.palette.iter().any(|c| c[3] != u8::MAX)
    }

    /// Expand back to packed RGB, dropping alpha.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.indices.len() * 3);
        for &index in &self.indices {
            let color = self.palette[index as usize];
            rgb.extend_from_slice(&color[..3]);
        }
        rgb
    }
}

/// Build an adaptive palette of `colors` entries for `image` and map every
/// pixel to its nearest entry.
///
/// `colors` must be within 2..=256.
pub fn quantize(image: &DynamicImage, colors: usize) -> Result<IndexedImage, ConvertError> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(ConvertError::Empty);
    }

    let pixels = rgba.as_raw();
    let quant = NeuQuant::new(SAMPLE_FACTOR, colors, pixels);

    let palette = quant
        .color_map_rgba()
        .chunks_exact(4)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect();
    let indices = pixels
        .chunks_exact(4)
        .map(|pixel| quant.index_of(pixel) as u8)
        .collect();

    Ok(IndexedImage {
        width,
        height,
        palette,
        indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn palette_is_bounded() {
        let img = RgbaImage::from_fn(64, 64, |x, y| Rgba([(x * 4) as u8, (y * 4) as u8, 7, 255]));
        let indexed = quantize(&DynamicImage::ImageRgba8(img), 16).unwrap();

        assert_eq!(indexed.palette.len(), 16);
        assert_eq!(indexed.indices.len(), 64 * 64);
        assert!(indexed.indices.iter().all(|&i| (i as usize) < 16));
        assert_eq!(indexed.to_rgb().len(), 64 * 64 * 3);
    }

    #[test]
    fn flat_image_maps_close_to_source() {
        let img = RgbaImage::from_pixel(32, 32, Rgba([200, 40, 90, 255]));
        let indexed = quantize(&DynamicImage::ImageRgba8(img), 256).unwrap();

        let color = indexed.palette[indexed.indices[0] as usize];
        for (got, want) in color.iter().zip([200u8, 40, 90, 255]) {
            assert!(got.abs_diff(want) <= 12, "{:?}", color);
        }
    }

    #[test]
    fn empty_image_is_rejected() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(0, 5));
        assert!(matches!(quantize(&img, 256), Err(ConvertError::Empty)));
    }
}
