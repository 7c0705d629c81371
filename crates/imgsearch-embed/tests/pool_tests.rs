use candle_core::{Device, Tensor};
use image::{DynamicImage, ImageBuffer, Rgb};

use imgsearch_embed::pool::{l2_normalize, to_embedding};
use imgsearch_embed::preprocess::ImageTransform;

#[test]
fn l2_normalize_rows() {
    let dev = Device::Cpu;
    let t = Tensor::from_slice(&[3.0f32, 4.0, 0.0, 2.0], (2, 2), &dev).unwrap();
    let v: Vec<Vec<f32>> = l2_normalize(&t).unwrap().to_vec2().unwrap();
    let expected = [[0.6f32, 0.8], [0.0, 1.0]];
    for (row, exp) in v.iter().zip(expected) {
        for (a, b) in row.iter().cloned().zip(exp) {
            assert!((a - b).abs() < 1e-5, "a={} b={}", a, b);
        }
    }
}

#[test]
fn to_embedding_checks_dimension() {
    let t = Tensor::from_slice(&[1.0f32, 1.0, 1.0, 1.0], (1, 4), &Device::Cpu).unwrap();
    assert_eq!(to_embedding(&t, 4).unwrap().len(), 4);
    assert!(to_embedding(&t, 8).is_err());
}

#[test]
fn transforms_produce_square_normalized_input() {
    let white = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 20, Rgb([255u8, 255, 255])));

    let siglip = ImageTransform::siglip(16);
    let t = siglip.apply(&white, &Device::Cpu).unwrap();
    assert_eq!(t.dims(), &[1, 3, 16, 16]);
    let values: Vec<f32> = t.flatten_all().unwrap().to_vec1().unwrap();
    assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-5), "white maps to 1.0 with mean=std=0.5");

    let clip = ImageTransform::clip(16);
    let cropped = clip.resize(&white);
    assert_eq!(cropped.dimensions(), (16, 16), "shortest side scaled then center-cropped");
}
