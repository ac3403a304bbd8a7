//! Image header and EXIF inspection.
//!
//! Decoding is best-effort: bytes that are not a recognised image yield an
//! `ImageDetails` with every field empty, and an EXIF failure only empties
//! the tag map.

use crate::models::image_record::{ExifTags, ImageDetails};
use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use std::io::{self, Cursor};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("unrecognised image format")]
    UnknownFormat,
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Header-level facts about a decodable image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub mode: String,
}

/// Inspect `bytes`, degrading to empty details instead of failing.
pub fn inspect(bytes: &[u8]) -> ImageDetails {
    let header = match read_header(bytes) {
        Ok(header) => header,
        Err(err) => {
            info!(error = %err, "bytes are not a decodable image; storing without image fields");
            return ImageDetails::default();
        }
    };

    let exif = match read_exif(bytes) {
        Ok(tags) => tags,
        Err(err) => {
            debug!(error = %err, "EXIF extraction failed");
            ExifTags::new()
        }
    };

    ImageDetails {
        width: Some(header.width),
        height: Some(header.height),
        format: Some(header.format),
        mode: Some(header.mode),
        exif,
    }
}

/// Guess the format from content and read dimensions and color type.
pub fn read_header(bytes: &[u8]) -> Result<ImageHeader, InspectError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().ok_or(InspectError::UnknownFormat)?;
    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();

    Ok(ImageHeader {
        width,
        height,
        format: format_name(format),
        mode: color_mode(decoder.color_type()),
    })
}

/// Read the primary image's EXIF fields, keyed by registry tag name.
///
/// Tags missing from the registry are keyed by their decimal tag number.
pub fn read_exif(bytes: &[u8]) -> Result<ExifTags, exif::Error> {
    let exif = exif::Reader::new().read_from_container(&mut Cursor::new(bytes))?;

    let tags = exif
        .fields()
        .filter(|field| field.ifd_num == exif::In::PRIMARY)
        .map(|field| {
            let name = match field.tag.description() {
                Some(_) => field.tag.to_string(),
                None => field.tag.number().to_string(),
            };
            let value = field.display_value().to_string();
            (name, strip_quotes(&value).to_string())
        })
        .collect();

    Ok(tags)
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Upper-case format identifier, e.g. `JPEG` or `PNG`.
fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".into(),
        ImageFormat::Png => "PNG".into(),
        ImageFormat::Gif => "GIF".into(),
        ImageFormat::WebP => "WEBP".into(),
        ImageFormat::Tiff => "TIFF".into(),
        ImageFormat::Bmp => "BMP".into(),
        ImageFormat::Ico => "ICO".into(),
        ImageFormat::Pnm => "PPM".into(),
        other => format!("{:?}", other).to_ascii_uppercase(),
    }
}

/// Color mode in the conventional short notation (`L`, `RGB`, `RGBA`, ...).
fn color_mode(color: ColorType) -> String {
    match color {
        ColorType::L8 => "L".into(),
        ColorType::La8 | ColorType::La16 => "LA".into(),
        ColorType::L16 => "I;16".into(),
        ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => "RGB".into(),
        ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => "RGBA".into(),
        other => format!("{:?}", other).to_ascii_uppercase(),
    }
}
