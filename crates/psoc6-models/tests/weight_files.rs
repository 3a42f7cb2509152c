//! Weight and image files on disk

use psoc6_models::{Cifar10Model, Image, ModelError, WeightFile, SAMPLE_IMAGE};
use std::fs;

#[test]
fn test_export_then_load_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifar10.q7w");

    let model = Cifar10Model::synthetic(11);
    model.to_weight_file().write(&path).expect("write weights");

    let loaded = Cifar10Model::from_file(&path).expect("load weights");
    assert_eq!(loaded.conv1.weights(), model.conv1.weights());
    assert_eq!(loaded.conv2.bias(), model.conv2.bias());
    assert_eq!(loaded.input, model.input);
}

#[test]
fn test_exported_file_size() {
    let bytes = Cifar10Model::synthetic(1)
        .to_weight_file()
        .to_bytes()
        .expect("serialize");
    let header = 4 + 2 + 2 + 3 + 3;
    let layer_headers = 4 * 12;
    let tensors = 2400 + 32 + 12800 + 16 + 12800 + 32 + 5120 + 10;
    assert_eq!(bytes.len(), header + layer_headers + tensors);
}

#[test]
fn test_missing_weight_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = WeightFile::read(dir.path().join("absent.q7w")).unwrap_err();
    assert!(matches!(err, ModelError::FileNotFound { .. }));
}

#[test]
fn test_garbage_weight_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("garbage.q7w");
    fs::write(&path, b"not a weight file at all").expect("write");
    assert!(matches!(
        Cifar10Model::from_file(&path),
        Err(ModelError::InvalidHeader)
    ));
}

#[test]
fn test_raw_image_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("frame.rgb");
    fs::write(&path, SAMPLE_IMAGE).expect("write");

    let image = Image::from_file(&path).expect("read image");
    assert_eq!(image.as_bytes(), &SAMPLE_IMAGE);
}

#[test]
fn test_truncated_image_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("short.rgb");
    fs::write(&path, [1u8; 100]).expect("write");

    match Image::from_file(&path).unwrap_err() {
        ModelError::InvalidImage { expected, actual } => {
            assert_eq!(expected, 3072);
            assert_eq!(actual, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
}
