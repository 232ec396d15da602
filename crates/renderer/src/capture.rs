use std::path::Path;

use anyhow::{bail, Context, Result};
use image::imageops::flip_vertical_in_place;
use image::{DynamicImage, Rgba32FImage, RgbaImage};

use crate::gpu::{ComponentType, GpuContext, GpuImage, TransferLayout};

/// Reads `source` back and writes it to `path` as an 8-bit RGBA PNG.
///
/// Row zero of a render image is the bottom of the picture, so the rows are
/// flipped on the way out.
pub fn save_png(context: &GpuContext, source: &GpuImage, path: &Path) -> Result<()> {
    let format = source.format();
    if format.layout() != TransferLayout::Rgba {
        bail!(
            "capture needs an RGBA image, '{}' is {:?}",
            source.label(),
            format.layout()
        );
    }

    let bytes = source
        .read_back(context)
        .with_context(|| format!("failed to read back '{}'", source.label()))?;
    let (width, height) = source.dimensions();
    let mut picture = match format.component() {
        ComponentType::UnsignedByte => RgbaImage::from_raw(width, height, bytes),
        ComponentType::HalfFloat => {
            let texels = bytes
                .chunks_exact(2)
                .map(|half| f16_to_f32(u16::from_le_bytes([half[0], half[1]])))
                .collect();
            float_to_rgba8(width, height, texels)
        }
        ComponentType::Float => {
            let texels = bytes
                .chunks_exact(4)
                .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                .collect();
            float_to_rgba8(width, height, texels)
        }
    }
    .context("read-back size does not match the image dimensions")?;
    flip_vertical_in_place(&mut picture);

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    picture
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("failed to write capture to {}", path.display()))?;
    tracing::info!(path = %path.display(), width, height, "saved capture");
    Ok(())
}

fn float_to_rgba8(width: u32, height: u32, texels: Vec<f32>) -> Option<RgbaImage> {
    Rgba32FImage::from_raw(width, height, texels).map(|image| DynamicImage::ImageRgba32F(image).to_rgba8())
}

/// IEEE 754 binary16 to binary32.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x3ff);
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_floats_decode() {
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x3800), 0.5);
        assert_eq!(f16_to_f32(0x7c00), f32::INFINITY);
        assert!(f16_to_f32(0x7e00).is_nan());
    }

    #[test]
    fn float_texels_saturate_to_bytes() {
        let picture = float_to_rgba8(1, 1, vec![-1.0, 0.0, 4.0, 1.0]).expect("one texel");
        assert_eq!(picture.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert!(float_to_rgba8(2, 1, vec![0.0; 4]).is_none());
    }
}
