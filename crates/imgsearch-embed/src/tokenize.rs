use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// How a text-tower input is shaped before it reaches the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub max_len: usize,
    pub pad_id: u32,
    /// When set, a truncated sequence ends with this token again.
    pub eot_id: Option<u32>,
}

pub fn load_tokenizer(path: &std::path::Path) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
    // padding/truncation is applied by `token_ids`, not by tokenizer.json settings
    tokenizer.with_padding(None);
    tokenizer.with_truncation(None).map_err(|e| anyhow!("Failed to reset truncation: {}", e))?;
    Ok(tokenizer)
}

/// Encode, truncate and pad to exactly `policy.max_len` ids.
pub fn token_ids(tokenizer: &Tokenizer, text: &str, policy: &TokenPolicy) -> Result<Vec<u32>> {
    let enc = tokenizer.encode(text, true).map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    Ok(shape_ids(enc.get_ids().to_vec(), policy))
}

pub fn shape_ids(mut ids: Vec<u32>, policy: &TokenPolicy) -> Vec<u32> {
    if ids.len() > policy.max_len {
        ids.truncate(policy.max_len);
        if let (Some(eot), Some(last)) = (policy.eot_id, ids.last_mut()) { *last = eot; }
    }
    if ids.len() < policy.max_len { let pad = policy.max_len - ids.len(); ids.extend(std::iter::repeat(policy.pad_id).take(pad)); }
    ids
}

pub fn tokenize_on_device(tokenizer: &Tokenizer, text: &str, policy: &TokenPolicy, device: &Device) -> Result<Tensor> {
    let ids = token_ids(tokenizer, text, policy)?;
    Ok(Tensor::from_iter(ids, device)?.reshape((1, policy.max_len))?)
}
