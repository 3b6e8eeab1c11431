//! Output codecs
//!
//! Images are always encoded into memory first; callers persist the bytes
//! only once the whole render succeeded.

use crate::{Error, Result};
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Image codec for the rendered output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Bmp,
    Gif,
    Tiff,
    WebP,
    Pnm,
    Tga,
}

impl OutputFormat {
    /// Canonical lowercase name, as accepted by `-f/--format`
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Gif => "gif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::WebP => "webp",
            OutputFormat::Pnm => "ppm",
            OutputFormat::Tga => "tga",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Bmp => ImageFormat::Bmp,
            OutputFormat::Gif => ImageFormat::Gif,
            OutputFormat::Tiff => ImageFormat::Tiff,
            OutputFormat::WebP => ImageFormat::WebP,
            OutputFormat::Pnm => ImageFormat::Pnm,
            OutputFormat::Tga => ImageFormat::Tga,
        }
    }

    /// Whether the codec can store an alpha channel
    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg | OutputFormat::Pnm)
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let format = match s.trim().to_ascii_lowercase().as_str() {
            "png" => OutputFormat::Png,
            "jpg" | "jpeg" => OutputFormat::Jpeg,
            "bmp" => OutputFormat::Bmp,
            "gif" => OutputFormat::Gif,
            "tif" | "tiff" => OutputFormat::Tiff,
            "webp" => OutputFormat::WebP,
            "ppm" | "pnm" => OutputFormat::Pnm,
            "tga" => OutputFormat::Tga,
            other => {
                return Err(Error::EncodeFailed(format!(
                    "unsupported output format '{}'",
                    other
                )))
            }
        };
        Ok(format)
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(value: OutputFormat) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode an RGBA buffer with the given codec.
pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::EncodeFailed("cannot encode an empty image".into()));
    }

    let dynamic = if format.supports_alpha() {
        DynamicImage::ImageRgba8(image.clone())
    } else {
        DynamicImage::ImageRgba8(image.clone()).into_rgb8().into()
    };

    let mut out = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut out, format.image_format())
        .map_err(|e| Error::EncodeFailed(format!("{} encoder: {}", format, e)))?;
    Ok(out.into_inner())
}
