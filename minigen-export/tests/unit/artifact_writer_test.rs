use super::*;

use safetensors::SafeTensors;
use tempfile::TempDir;

fn read_f32(view: &TensorView<'_>) -> Vec<f32> {
    let mut values = vec![0.0f32; view.data().len() / 4];
    LittleEndian::read_f32_into(view.data(), &mut values);
    values
}

#[test]
fn test_write_and_read_back_f32() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.safetensors");
    let tensors = vec![
        NamedTensor::new("E", vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        NamedTensor::zeros("output_bias", vec![2]),
    ];

    ArtifactWriter::new().with_num_heads(3).write(&path, &tensors).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let safetensors = SafeTensors::deserialize(&bytes).unwrap();

    let embedding = safetensors.tensor("E").unwrap();
    assert_eq!(embedding.dtype(), Dtype::F32);
    assert_eq!(embedding.shape(), &[2, 3]);
    assert_eq!(read_f32(&embedding), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let bias = safetensors.tensor("output_bias").unwrap();
    assert_eq!(read_f32(&bias), vec![0.0, 0.0]);

    let (_, header) = SafeTensors::read_metadata(&bytes).unwrap();
    let metadata = header.metadata().clone().unwrap_or_default();
    assert_eq!(metadata.get(NUM_HEADS_METADATA_KEY).map(String::as_str), Some("3"));
}

#[test]
fn test_bf16_keeps_upper_bits() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.safetensors");
    let tensors = vec![NamedTensor::new("positional_embedding", vec![1, 2], vec![1.5, -2.0]).unwrap()];

    ArtifactWriter::new().with_precision(TensorPrecision::Bf16).write(&path, &tensors).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let safetensors = SafeTensors::deserialize(&bytes).unwrap();
    let view = safetensors.tensor("positional_embedding").unwrap();

    assert_eq!(view.dtype(), Dtype::BF16);
    let restored = view
        .data()
        .chunks_exact(2)
        .map(|chunk| f32::from_bits((LittleEndian::read_u16(chunk) as u32) << 16))
        .collect::<Vec<_>>();
    assert_eq!(restored, vec![1.5, -2.0]);
}

#[test]
fn test_without_metadata() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.safetensors");

    ArtifactWriter::new().write(&path, &[NamedTensor::zeros("E", vec![1, 1])]).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (_, header) = SafeTensors::read_metadata(&bytes).unwrap();
    assert!(header.metadata().as_ref().is_none_or(|metadata| metadata.is_empty()));
}

#[test]
fn test_custom_metadata_is_written() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.safetensors");

    ArtifactWriter::new()
        .with_metadata("format", "minigen")
        .with_num_heads(2)
        .write(&path, &[NamedTensor::zeros("E", vec![1, 2])])
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (_, header) = SafeTensors::read_metadata(&bytes).unwrap();
    let metadata = header.metadata().clone().unwrap_or_default();
    assert_eq!(metadata.get("format").map(String::as_str), Some("minigen"));
    assert_eq!(metadata.get(NUM_HEADS_METADATA_KEY).map(String::as_str), Some("2"));
}

#[test]
fn test_duplicate_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let tensors = vec![NamedTensor::zeros("E", vec![1, 1]), NamedTensor::zeros("E", vec![2, 1])];

    let result = ArtifactWriter::new().write(&dir.path().join("model.safetensors"), &tensors);

    assert!(result.unwrap_err().to_string().contains("Duplicate tensor name E"));
}

#[test]
fn test_named_tensor_checks_size() {
    assert!(NamedTensor::new("WQ_0", vec![2, 2], vec![0.0; 3]).is_err());
    assert_eq!(NamedTensor::zeros("output_bias", vec![4]).data, vec![0.0; 4]);
}
