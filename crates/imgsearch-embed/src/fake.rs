use std::hash::{Hash, Hasher};

use candle_core::Device;
use image::DynamicImage;
use twox_hash::XxHash64;

use imgsearch_core::types::{normalize_in_place, Embedding, ModelDescriptor};
use imgsearch_core::{Error, Result};

use crate::encoder::Encoder;

const THUMB: u32 = 8;

/// Hash-based encoder: same input and model always give the same unit
/// vector, different models give unrelated vectors. No weights involved.
#[derive(Debug, Default, Clone)]
pub struct FakeEncoder {
    space: Option<(usize, u64)>,
}

impl FakeEncoder {
    fn space(&self) -> Result<(usize, u64)> {
        self.space.ok_or_else(|| Error::Operation("fake encoder used before load".into()))
    }
}

fn bucket<T: Hash>(seed: u64, key: T, dim: usize) -> (usize, f32) {
    let mut hasher = XxHash64::with_seed(seed);
    key.hash(&mut hasher);
    let h = hasher.finish();
    ((h as usize) % dim, (((h >> 32) as u32) as f32) / (u32::MAX as f32))
}

fn finish(mut v: Vec<f32>) -> Embedding {
    if v.iter().all(|x| *x == 0.0) { v[0] = 1.0; }
    normalize_in_place(&mut v);
    v
}

impl Encoder for FakeEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, _device: &Device) -> Result<()> {
        let mut hasher = XxHash64::with_seed(0);
        descriptor.id.hash(&mut hasher);
        self.space = Some((descriptor.vector_dim, hasher.finish()));
        Ok(())
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> {
        let (dim, seed) = self.space()?;
        let mut v = vec![0f32; dim];
        let thumb = image.thumbnail_exact(THUMB, THUMB).to_rgb8();
        for (x, y, pixel) in thumb.enumerate_pixels() {
            for c in 0..3u8 {
                let (idx, val) = bucket(seed, (x, y, c, pixel[c as usize] / 32), dim);
                v[idx] += 0.5 + val;
            }
        }
        Ok(finish(v))
    }

    fn encode_text(&self, text: &str) -> Result<Embedding> {
        let (dim, seed) = self.space()?;
        let mut v = vec![0f32; dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let (idx, val) = bucket(seed, token.to_lowercase(), dim);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        Ok(finish(v))
    }

    fn unload(&mut self) {
        self.space = None;
    }
}
