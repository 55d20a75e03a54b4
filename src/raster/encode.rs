use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use super::{ConvertError, IndexedImage};

/// Write an 8-bit indexed PNG with maximum compression and adaptive row
/// filters. A `tRNS` chunk is emitted only when the palette has alpha.
pub fn encode_png(image: &IndexedImage) -> Result<Vec<u8>, ConvertError> {
    let rgb_palette: Vec<u8> = image.palette.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, image.width, image.height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(rgb_palette);
    if image.has_transparency() {
        let alpha: Vec<u8> = image.palette.iter().map(|c| c[3]).collect();
        encoder.set_trns(alpha);
    }
    encoder.set_compression(png::Compression::Best);
    encoder.set_adaptive_filter(png::AdaptiveFilterType::Adaptive);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.indices)?;
    writer.finish()?;

    Ok(out)
}

/// Expand the palette to RGB and write a baseline JPEG.
pub fn encode_jpeg(image: &IndexedImage, quality: u8) -> Result<Vec<u8>, ConvertError> {
    let rgb = image.to_rgb();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(&rgb, image.width, image.height, ExtendedColorType::Rgb8)
        .map_err(ConvertError::Jpeg)?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn checker(opaque: bool) -> IndexedImage {
        let alpha = if opaque { 255 } else { 0 };
        IndexedImage {
            width: 4,
            height: 2,
            palette: vec![[0, 0, 0, 255], [255, 255, 255, alpha]],
            indices: vec![0, 1, 0, 1, 1, 0, 1, 0],
        }
    }

    #[test]
    fn png_carries_palette_and_transparency() {
        let out = encode_png(&checker(false)).unwrap();

        let reader = png::Decoder::new(Cursor::new(&out)).read_info().unwrap();
        let info = reader.info();
        assert_eq!(info.color_type, png::ColorType::Indexed);
        assert_eq!(info.palette.as_deref(), Some(&[0, 0, 0, 255, 255, 255][..]));
        assert_eq!(info.trns.as_deref(), Some(&[255, 0][..]));
    }

    #[test]
    fn opaque_png_has_no_trns() {
        let out = encode_png(&checker(true)).unwrap();
        let reader = png::Decoder::new(Cursor::new(&out)).read_info().unwrap();
        assert!(reader.info().trns.is_none());
    }

    #[test]
    fn jpeg_round_trips_dimensions() {
        let out = encode_jpeg(&checker(true), 90).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 2));
    }
}
