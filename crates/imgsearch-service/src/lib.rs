//! imgsearch-service
//!
//! The flows a front end drives: upload-and-index, text search, model
//! selection, and streamed model loading / directory indexing.

pub mod files;
pub mod progress;
pub mod responses;
pub mod service;

pub use progress::{IndexSummary, ProgressEvent};
pub use service::ImageSearchService;
