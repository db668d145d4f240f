/// Image preprocessing: transport decoding, format sniffing, size ceilings
/// and EXIF orientation correction.
///
/// Everything downstream works in the coordinate space of the *upright*
/// image, so the dimensions reported here are the ones a click lands in.
use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::errors::{GroundingError, GroundingResult};

/// Largest encoded image accepted, in bytes.
pub const MAX_IMAGE_BYTES: usize = 6 * 1024 * 1024;
/// Largest accepted width or height, in pixels.
pub const MAX_DIMENSION: u32 = 8000;

const SUPPORTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
    pub max_bytes: usize,
    pub max_dimension: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_bytes: MAX_IMAGE_BYTES,
            max_dimension: MAX_DIMENSION,
        }
    }
}

/// A decoded, orientation-corrected screenshot.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub image: DynamicImage,
}

impl DecodedImage {
    /// Re-encode the upright image as PNG (what backends are sent).
    pub fn to_png(&self) -> GroundingResult<Vec<u8>> {
        let mut png_bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .map_err(|e| GroundingError::Decode(format!("PNG encode: {e}")))?;
        Ok(png_bytes)
    }
}

/// Decode base64 transport encoding. Accepts an optional `data:<mime>;base64,`
/// prefix and ignores ASCII whitespace (line-wrapped payloads).
pub fn decode_base64(payload: &str) -> GroundingResult<Vec<u8>> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(GroundingError::EmptyInput(
            "image_base64 must be a non-empty string".into(),
        ));
    }

    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(";base64,")
            .map(|(_, b64)| b64)
            .ok_or_else(|| GroundingError::Encoding("data URL is not base64-encoded".into()))?,
        None => trimmed,
    };

    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GroundingError::Encoding(e.to_string()))?;

    if bytes.is_empty() {
        return Err(GroundingError::EmptyImage);
    }
    Ok(bytes)
}

/// Decode an encoded image, enforce limits and apply EXIF orientation.
pub fn decode_image(bytes: &[u8], limits: &ImageLimits) -> GroundingResult<DecodedImage> {
    if bytes.is_empty() {
        return Err(GroundingError::EmptyImage);
    }
    if bytes.len() > limits.max_bytes {
        return Err(GroundingError::ImageTooLarge(format!(
            "image exceeds {}MB limit",
            limits.max_bytes / (1024 * 1024)
        )));
    }

    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| GroundingError::Decode(format!("format sniff: {e}")))?;
    let format = reader
        .format()
        .ok_or_else(|| GroundingError::Decode("unrecognized image format".into()))?;
    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(GroundingError::Decode(format!("unsupported image format: {format:?}")));
    }

    // Bounds the decoder's allocations, so oversized images fail before the
    // pixel buffer is allocated.
    let mut decode_limits = image::Limits::default();
    decode_limits.max_image_width = Some(limits.max_dimension);
    decode_limits.max_image_height = Some(limits.max_dimension);
    reader.limits(decode_limits);

    let img = reader.decode().map_err(|e| match e {
        image::ImageError::Limits(_) => GroundingError::DimensionsTooLarge(format!(
            "image dimensions exceed {}px limit",
            limits.max_dimension
        )),
        other => GroundingError::Decode(other.to_string()),
    })?;

    let orientation = read_exif_orientation(bytes);
    let img = apply_orientation(img, orientation);
    let (width, height) = (img.width(), img.height());

    if width == 0 || height == 0 {
        return Err(GroundingError::InvalidDimensions("image has zero dimensions".into()));
    }

    tracing::debug!(?format, width, height, orientation, "image decoded");
    Ok(DecodedImage {
        width,
        height,
        format,
        image: img,
    })
}

/// EXIF orientation tag (0x0112); 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(e) => e,
        Err(_) => return 1,
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Rotate/flip so the buffer matches what a viewer would show.
///
/// 1 = normal, 2 = mirrored, 3 = 180°, 4 = flipped vertically,
/// 5 = mirrored + 90° CW, 6 = 90° CW, 7 = mirrored + 270° CW, 8 = 270° CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
pub(crate) fn png_fixture(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .expect("encode fixture");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_dimensions() {
        let bytes = png_fixture(64, 32);
        let img = decode_image(&bytes, &ImageLimits::default()).unwrap();
        assert_eq!((img.width, img.height), (64, 32));
        assert_eq!(img.format, ImageFormat::Png);
    }

    #[test]
    fn rejects_garbage_and_empty_blobs() {
        let err = decode_image(b"definitely not an image", &ImageLimits::default()).unwrap_err();
        assert!(matches!(err, GroundingError::Decode(_)));
        let err = decode_image(&[], &ImageLimits::default()).unwrap_err();
        assert!(matches!(err, GroundingError::EmptyImage));
    }

    #[test]
    fn enforces_byte_ceiling() {
        let bytes = png_fixture(16, 16);
        let limits = ImageLimits {
            max_bytes: 8,
            max_dimension: MAX_DIMENSION,
        };
        let err = decode_image(&bytes, &limits).unwrap_err();
        assert!(matches!(err, GroundingError::ImageTooLarge(_)));
        assert_eq!(err.code(), "image_too_large");
    }

    #[test]
    fn enforces_dimension_ceiling() {
        let bytes = png_fixture(120, 40);
        let limits = ImageLimits {
            max_bytes: MAX_IMAGE_BYTES,
            max_dimension: 100,
        };
        let err = decode_image(&bytes, &limits).unwrap_err();
        assert!(matches!(err, GroundingError::DimensionsTooLarge(_)));
        assert_eq!(err.code(), "dimensions_too_large");
    }

    #[test]
    fn quarter_turn_orientations_swap_dimensions() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(30, 10));
        for orientation in [5, 6, 7, 8] {
            let out = apply_orientation(img.clone(), orientation);
            assert_eq!((out.width(), out.height()), (10, 30), "orientation {orientation}");
        }
        for orientation in [1, 2, 3, 4, 42] {
            let out = apply_orientation(img.clone(), orientation);
            assert_eq!((out.width(), out.height()), (30, 10), "orientation {orientation}");
        }
    }

    #[test]
    fn png_without_exif_reads_as_upright() {
        assert_eq!(read_exif_orientation(&png_fixture(4, 4)), 1);
    }

    /// JPEG with an APP1 Exif segment carrying the given orientation tag.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut jpeg = Vec::new();
        img.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        // Big-endian TIFF header, IFD0 with a single SHORT entry (0x0112).
        let mut tiff = b"MM\x00\x2A\x00\x00\x00\x08".to_vec();
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0, 0]);
        tiff.extend_from_slice(&0u32.to_be_bytes());

        let mut app1 = b"Exif\x00\x00".to_vec();
        app1.extend_from_slice(&tiff);
        let segment_len = (app1.len() + 2) as u16;

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&segment_len.to_be_bytes());
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn exif_rotated_jpeg_reports_upright_dimensions() {
        let bytes = jpeg_with_orientation(40, 16, 6);
        assert_eq!(read_exif_orientation(&bytes), 6);
        let img = decode_image(&bytes, &ImageLimits::default()).unwrap();
        assert_eq!(img.format, ImageFormat::Jpeg);
        assert_eq!((img.width, img.height), (16, 40));
    }

    #[test]
    fn exif_upright_jpeg_keeps_dimensions() {
        let bytes = jpeg_with_orientation(40, 16, 1);
        let img = decode_image(&bytes, &ImageLimits::default()).unwrap();
        assert_eq!((img.width, img.height), (40, 16));
    }

    #[test]
    fn base64_accepts_data_urls_and_wrapped_lines() {
        let raw = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        let wrapped = format!("{}\n{}", &raw[..6], &raw[6..]);
        assert_eq!(decode_base64(&wrapped).unwrap(), b"hello world");
        let url = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_base64(&url).unwrap(), b"hello world");
    }

    #[test]
    fn base64_rejects_invalid_payloads() {
        assert!(matches!(decode_base64("   "), Err(GroundingError::EmptyInput(_))));
        assert!(matches!(decode_base64("@@@not-base64@@@"), Err(GroundingError::Encoding(_))));
        assert!(matches!(
            decode_base64("data:image/png,rawbytes"),
            Err(GroundingError::Encoding(_))
        ));
    }
}
