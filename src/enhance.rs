//! Fixed scan-cleanup filter chain: greyscale, contrast stretch, sharpen.

use image::{DynamicImage, GrayImage, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::Result;

pub const ENHANCED_JPEG_QUALITY: u8 = 95;

/// Percentiles mapped to black and white by the contrast stretch.
const LOW_PERCENTILE: f64 = 0.01;
const HIGH_PERCENTILE: f64 = 0.99;

const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Run the enhancement chain on an encoded image; always returns JPEG bytes.
pub fn enhance(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    debug!("Enhancing {}x{} image", img.width(), img.height());

    let mut gray = img.to_luma8();
    normalize(&mut gray);
    let sharpened = image::imageops::filter3x3(&gray, &SHARPEN_KERNEL);

    encode_jpeg(&DynamicImage::ImageLuma8(sharpened), ENHANCED_JPEG_QUALITY)
}

/// Stretch the 1st..99th percentile luminance band to the full 0..255 range.
fn normalize(img: &mut GrayImage) {
    let mut histogram = [0u64; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return;
    }

    let low = percentile(&histogram, total, LOW_PERCENTILE);
    let high = percentile(&histogram, total, HIGH_PERCENTILE);
    if high <= low {
        return;
    }

    let range = (high - low) as f32;
    for p in img.pixels_mut() {
        let v = p.0[0].clamp(low, high) - low;
        p.0[0] = (v as f32 * 255.0 / range).round() as u8;
    }
}

fn percentile(histogram: &[u64; 256], total: u64, fraction: f64) -> u8 {
    let target = (total as f64 * fraction).max(1.0);
    let mut seen = 0u64;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen as f64 >= target {
            return value as u8;
        }
    }
    u8::MAX
}

pub(crate) fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))?;
    Ok(buf)
}
