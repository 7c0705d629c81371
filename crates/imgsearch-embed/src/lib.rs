//! imgsearch-embed
//!
//! Image/text encoders (CLIP, OpenCLIP, SigLIP on candle), the bounded
//! model cache that keeps them resident, and the embedding pipeline on top.

pub mod cache;
pub mod clip;
pub mod device;
pub mod encoder;
pub mod fake;
pub mod pipeline;
pub mod pool;
pub mod preprocess;
pub mod siglip;
pub mod tokenize;
pub mod weights;

pub use candle_core::Device;
pub use cache::{ModelCache, ResidentEncoder};
pub use encoder::{get_default_factory, Encoder, EncoderFactory, FakeFactory, FamilyFactory};
pub use pipeline::EmbeddingPipeline;
pub use weights::WeightSource;
