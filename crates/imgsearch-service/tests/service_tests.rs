use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

use imgsearch_core::config::SearchConfig;
use imgsearch_core::types::{Embedding, ModelDescriptor};
use imgsearch_core::{Error, Registry, Result};
use imgsearch_embed::{Device, EmbeddingPipeline, Encoder, EncoderFactory, FakeFactory, ModelCache};
use imgsearch_service::{ImageSearchService, IndexSummary, ProgressEvent};
use imgsearch_vector::{IndexRouter, MemoryEngine};

const DEFAULT: &str = "openai/ViT-B-32";
const SIGLIP: &str = "siglip/base-patch16-224";

/// Encoders whose load always fails, as with an unreachable weight host.
struct OfflineFactory;
struct OfflineEncoder;

impl EncoderFactory for OfflineFactory {
    fn create(&self, _descriptor: &ModelDescriptor) -> Box<dyn Encoder> { Box::new(OfflineEncoder) }
}

impl Encoder for OfflineEncoder {
    fn load(&mut self, descriptor: &ModelDescriptor, _device: &Device) -> Result<()> {
        Err(Error::Load(format!("{}: network unreachable", descriptor.id)))
    }
    fn encode_image(&self, _image: &DynamicImage) -> Result<Embedding> { unreachable!("never loaded") }
    fn encode_text(&self, _text: &str) -> Result<Embedding> { unreachable!("never loaded") }
    fn unload(&mut self) {}
}

fn service_with(factory: Arc<dyn EncoderFactory>, images_dir: &Path) -> ImageSearchService {
    let registry = Arc::new(Registry::builtin());
    let cache = ModelCache::new(Arc::clone(&registry), factory, Device::Cpu, 2, DEFAULT).expect("cache");
    let router = IndexRouter::new(Arc::new(MemoryEngine::new()), registry, "images");
    ImageSearchService::new(
        EmbeddingPipeline::new(Arc::new(cache)),
        Arc::new(router),
        images_dir.to_path_buf(),
        SearchConfig { default_limit: 10, max_limit: 50 },
    )
}

fn fake_service(images_dir: &Path) -> ImageSearchService {
    service_with(Arc::new(FakeFactory), images_dir)
}

fn png(seed: u8) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(32, 32, |x, y| {
        Rgb([(x as u8).wrapping_mul(seed), (y as u8).wrapping_mul(3), seed])
    }));
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).expect("encode png");
    buf
}

#[tokio::test]
async fn upload_then_search_and_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());

    let receipt = service.upload_and_index(png(5), "cat.png", None).await.expect("upload");
    assert_eq!(receipt.model_id, DEFAULT);
    assert_eq!(receipt.filename, format!("{}_cat.png", receipt.id));
    assert!(dir.path().join(&receipt.filename).is_file(), "file stored under images dir");

    let response = service.search_text("cat", Some(5), None).await.expect("search");
    assert_eq!(response.model_id, DEFAULT);
    assert_eq!(response.results.len(), 1);
    let hit = &response.results[0];
    assert_eq!(hit.id, receipt.id);
    assert_eq!(hit.url, format!("/api/images/file/{}", receipt.filename));

    let images = service.list_images(None).await.expect("list");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].filename, receipt.filename);

    service.delete_image(None, &receipt.id).await.expect("delete");
    assert!(service.list_images(None).await.expect("list").is_empty());
}

#[tokio::test]
async fn upload_rejects_bad_input_without_side_effects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());

    let err = service.upload_and_index(png(1), "notes.txt", None).await.unwrap_err();
    assert!(matches!(err, Error::Rejected(_)), "got {err:?}");

    let err = service.upload_and_index(b"garbage".to_vec(), "broken.jpg", None).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {err:?}");

    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0, "nothing stored");
    assert!(service.list_images(None).await.expect("list").is_empty());
    assert!(service.pipeline().cache().list_loaded().is_empty(), "decode failure loads no model");
}

#[tokio::test]
async fn search_edge_cases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());

    let err = service.search_text("   ", None, None).await.unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));

    let response = service.search_text("sunset", None, Some(SIGLIP)).await.expect("search unindexed model");
    assert!(response.results.is_empty());

    let err = service.search_text("sunset", None, Some("nobody/model")).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn index_directory_reports_each_file_and_continues_past_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.png"), png(2)).expect("write");
    std::fs::write(dir.path().join("b.jpg"), b"not really a jpeg").expect("write");
    std::fs::write(dir.path().join("c.png"), png(9)).expect("write");
    std::fs::write(dir.path().join("readme.txt"), b"skip me").expect("write");
    let service = fake_service(dir.path());

    let events: Vec<ProgressEvent> = service.index_directory_stream(SIGLIP, None).await.expect("stream").collect().await;

    assert_eq!(events.len(), 6, "{events:?}");
    assert_eq!(events[0], ProgressEvent::LoadingModel { model_id: SIGLIP.into(), total: 3 });
    assert_eq!(events[1], ProgressEvent::Starting { model_id: SIGLIP.into(), total: Some(3) });
    assert_eq!(events[2], ProgressEvent::Indexing { current: 1, total: 3, file: "a.png".into() });
    assert!(matches!(&events[3], ProgressEvent::FileError { file, current: 2, total: 3, .. } if file == "b.jpg"));
    assert_eq!(events[4], ProgressEvent::Indexing { current: 3, total: 3, file: "c.png".into() });
    assert_eq!(
        events[5],
        ProgressEvent::Complete { model_id: SIGLIP.into(), summary: Some(IndexSummary { total: 3, indexed: 2, failed: 1 }) }
    );

    // indexing again overwrites instead of duplicating
    let _: Vec<_> = service.index_directory_stream(SIGLIP, None).await.expect("stream").collect().await;
    assert_eq!(service.list_images(Some(SIGLIP)).await.expect("list").len(), 2);
    assert!(service.list_images(Some(DEFAULT)).await.expect("list").is_empty(), "other models untouched");
}

#[tokio::test]
async fn index_directory_stops_when_model_cannot_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.png"), png(2)).expect("write");
    let service = service_with(Arc::new(OfflineFactory), dir.path());

    let events: Vec<ProgressEvent> = service.index_directory_stream(DEFAULT, None).await.expect("stream").collect().await;
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(events[0], ProgressEvent::LoadingModel { total: 1, .. }));
    assert!(matches!(&events[1], ProgressEvent::Error { error } if error.starts_with("Failed to load model")));
    assert!(events[1].is_terminal());
}

#[tokio::test]
async fn missing_directory_fails_before_streaming() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());
    let err = service.index_directory_stream(DEFAULT, Some(dir.path().join("nope"))).await.err().expect("missing dir");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn load_model_stream_reports_outcome() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());

    let events: Vec<ProgressEvent> = service.load_model_stream(SIGLIP).expect("stream").collect().await;
    assert_eq!(
        events,
        vec![
            ProgressEvent::Starting { model_id: SIGLIP.into(), total: None },
            ProgressEvent::Complete { model_id: SIGLIP.into(), summary: None },
        ]
    );
    assert!(service.pipeline().cache().is_loaded(SIGLIP));
    assert!(service.load_model_stream("nobody/model").is_err());

    let offline = service_with(Arc::new(OfflineFactory), dir.path());
    let events: Vec<ProgressEvent> = offline.load_model_stream(SIGLIP).expect("stream").collect().await;
    assert!(matches!(&events[1], ProgressEvent::Error { error } if error.contains("network unreachable")));
}

#[tokio::test]
async fn models_report_live_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let service = fake_service(dir.path());
    service.upload_and_index(png(4), "dog.png", None).await.expect("upload");
    service.set_current_model(SIGLIP).expect("switch");
    assert!(service.set_current_model("nobody/model").is_err());
    assert_eq!(service.current_model(), SIGLIP);

    let models = service.models().await.expect("models");
    assert_eq!(models.len(), Registry::builtin().list().len());
    let default = models.iter().find(|m| m.id == DEFAULT).expect("default");
    assert!(default.is_loaded && default.is_indexed && !default.is_current);
    assert_eq!(default.indexed_count, 1);
    let siglip = models.iter().find(|m| m.id == SIGLIP).expect("siglip");
    assert!(siglip.is_current && !siglip.is_loaded && !siglip.is_indexed);

    let status = service.status().await.expect("status");
    assert_eq!(status.current_model, SIGLIP);
    assert_eq!(status.loaded_models, vec![DEFAULT.to_string()]);
    assert_eq!(status.capacity, 2);
}
