use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};

/// Row-wise L2 normalization of a `[B, D]` feature tensor.
pub fn l2_normalize(features: &Tensor) -> Result<Tensor> {
    let dims = features.dims();
    if dims.len() != 2 { return Err(anyhow!("features must be [B,D], got {:?}", dims)); }
    let eps_val = match features.dtype() { DType::F16 | DType::BF16 => 1e-6f32, _ => 1e-12f32 };
    let eps = Tensor::new(&[eps_val], features.device())?.to_dtype(features.dtype())?.unsqueeze(0)?;
    let norm = features.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    Ok(features.broadcast_div(&norm)?)
}

/// Normalize a single-row feature tensor and copy it to the host as `Vec<f32>`.
pub fn to_embedding(features: &Tensor, expected_dim: usize) -> Result<Vec<f32>> {
    let normalized = l2_normalize(features)?;
    let v: Vec<f32> = normalized.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
    if v.len() != expected_dim { return Err(anyhow!("model produced {} dimensions, expected {}", v.len(), expected_dim)); }
    Ok(v)
}
