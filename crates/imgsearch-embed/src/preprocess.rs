//! Image input: decoding and the per-family pixel transform.

use std::path::Path;

use anyhow::Result as AnyResult;
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

use imgsearch_core::{Error, Result};

pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Decode raw bytes (JPEG, PNG, ...) into an image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))
}

pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Decode(format!("{}: {e}", path.display())),
    })?;
    decode_image(&bytes).map_err(|e| match e {
        Error::Decode(msg) => Error::Decode(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// Resize, optional center crop, and per-channel normalization into a
/// `[1, 3, size, size]` f32 tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageTransform {
    pub size: u32,
    pub center_crop: bool,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ImageTransform {
    /// Shortest side to `size`, then center crop; CLIP statistics.
    pub fn clip(size: u32) -> Self {
        Self { size, center_crop: true, mean: CLIP_MEAN, std: CLIP_STD }
    }

    /// Plain square resize; inputs mapped to [-1, 1].
    pub fn siglip(size: u32) -> Self {
        Self { size, center_crop: false, mean: [0.5; 3], std: [0.5; 3] }
    }

    pub fn resize(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        let s = self.size;
        if !self.center_crop {
            return imageops::resize(&rgb, s, s, FilterType::CatmullRom);
        }
        let (w, h) = rgb.dimensions();
        let scale = s as f32 / w.min(h).max(1) as f32;
        let nw = ((w as f32 * scale).round() as u32).max(s);
        let nh = ((h as f32 * scale).round() as u32).max(s);
        let resized = imageops::resize(&rgb, nw, nh, FilterType::CatmullRom);
        imageops::crop_imm(&resized, (nw - s) / 2, (nh - s) / 2, s, s).to_image()
    }

    pub fn to_chw(&self, rgb: &RgbImage) -> Vec<f32> {
        let (w, h) = rgb.dimensions();
        let plane = (w * h) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = (y * w + x) as usize;
            for c in 0..3 {
                data[c * plane + offset] = (pixel[c] as f32 / 255.0 - self.mean[c]) / self.std[c];
            }
        }
        data
    }

    pub fn apply(&self, image: &DynamicImage, device: &Device) -> AnyResult<Tensor> {
        let rgb = self.resize(image);
        let s = self.size as usize;
        Ok(Tensor::from_vec(self.to_chw(&rgb), (1, 3, s, s), device)?)
    }
}
