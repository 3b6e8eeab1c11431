//! Pixel post-processing: opaque flattening, scaling and cropping

use crate::{AspectRatio, Error, Result, ScaleSpec};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// Background used when an opaque capture still carries translucent pixels
pub const OPAQUE_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Composite every pixel over `background` so the result has alpha 255.
pub fn flatten_opaque(image: &mut RgbaImage, background: Rgba<u8>) {
    for px in image.pixels_mut() {
        let a = px[3] as u32;
        if a == 255 {
            continue;
        }
        for c in 0..3 {
            let fg = px[c] as u32;
            let bg = background[c] as u32;
            px[c] = ((fg * a + bg * (255 - a) + 127) / 255) as u8;
        }
        px[3] = 255;
    }
}

/// Size of a `(w, h)` image scaled towards `(tw, th)` under `mode`.
///
/// For `Crop` this is the size before cropping, i.e. the `Expand` size.
pub fn scaled_size(source: (u32, u32), target: (u32, u32), mode: AspectRatio) -> (u32, u32) {
    let (w, h) = (source.0 as u64, source.1 as u64);
    let (tw, th) = (target.0 as u64, target.1 as u64);
    if w == 0 || h == 0 {
        return target;
    }

    let fit = |use_height: bool| -> (u32, u32) {
        if use_height {
            ((th * w / h).max(1) as u32, th as u32)
        } else {
            (tw as u32, (tw * h / w).max(1) as u32)
        }
    };

    // width that keeps the aspect ratio at the target height
    let rw = th * w / h;
    match mode {
        AspectRatio::Ignore => target,
        AspectRatio::Keep => fit(rw <= tw),
        AspectRatio::Expand | AspectRatio::Crop => fit(rw >= tw),
    }
}

/// Resize (and for `Crop`, cut) `image` according to `spec`.
pub fn apply_scale(image: &RgbaImage, spec: &ScaleSpec) -> Result<RgbaImage> {
    if spec.width == 0 || spec.height == 0 {
        return Err(Error::InvalidArgs(format!(
            "scale target must be non-zero, got {}x{}",
            spec.width, spec.height
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(Error::CaptureFailed("captured image is empty".into()));
    }

    let (sw, sh) = scaled_size(image.dimensions(), (spec.width, spec.height), spec.aspect_ratio);
    let scaled = if (sw, sh) == image.dimensions() {
        image.clone()
    } else {
        imageops::resize(image, sw, sh, FilterType::Triangle)
    };

    if spec.aspect_ratio != AspectRatio::Crop {
        return Ok(scaled);
    }

    let cw = spec.width.min(scaled.width());
    let ch = spec.height.min(scaled.height());
    Ok(imageops::crop_imm(&scaled, 0, 0, cw, ch).to_image())
}
