use std::sync::Arc;

use imgsearch_core::types::{normalize_in_place, Payload};
use imgsearch_core::Registry;
use imgsearch_vector::{IndexRouter, LanceEngine};

const M: &str = "openai/ViT-B-32";

fn unit(hot: usize) -> Vec<f32> {
    let mut v: Vec<f32> = (0..512).map(|i| if i == hot { 1.0 } else { 0.0 }).collect();
    normalize_in_place(&mut v);
    v
}

#[tokio::test]
async fn lance_engine_full_flow() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let uri = tmp.path().join("lancedb");
    let engine = LanceEngine::open(uri.to_str().expect("utf8 path")).await.expect("open");
    let router = IndexRouter::new(Arc::new(engine), Arc::new(Registry::builtin()), "images");

    assert!(router.search(M, &unit(0), 5).await.expect("search before index").is_empty());

    let payload = Payload::from([("filename".to_string(), "a.jpg".to_string())]);
    router.upsert_one(M, "img1", unit(1), payload.clone()).await.expect("upsert");
    router.upsert_one(M, "img2", unit(2), Payload::new()).await.expect("upsert");
    router.upsert_one(M, "img1", unit(1), payload).await.expect("upsert again overwrites");

    let hits = router.search(M, &unit(1), 5).await.expect("search");
    assert_eq!(hits[0].id, "img1");
    assert!((hits[0].score - 1.0).abs() < 1e-3, "score={}", hits[0].score);
    assert_eq!(hits[0].payload.get("filename").map(String::as_str), Some("a.jpg"));

    let status = router.status_of(M).await.expect("status");
    assert!(status.exists);
    assert_eq!(status.point_count, 2);

    router.delete(M, &["img1".to_string()]).await.expect("delete");
    let listed = router.list_all(M).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "img2");

    assert!(router.delete_namespace(M).await.expect("drop"));
    assert!(!router.status_of(M).await.expect("status").exists);
}
