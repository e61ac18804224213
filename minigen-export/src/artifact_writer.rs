#[cfg(test)]
#[path = "../tests/unit/artifact_writer_test.rs"]
mod artifact_writer_test;

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::info;
use safetensors::{Dtype, tensor::TensorView};
use std::{
    collections::{HashMap, HashSet},
    mem,
    path::Path,
};

/// Metadata key holding the attention head count in the checkpoint header.
pub const NUM_HEADS_METADATA_KEY: &str = "num_heads";

/// On-disk element type of the written tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorPrecision {
    #[default]
    F32,
    /// Upper 16 bits of each f32 (truncating).
    Bf16,
}

impl TensorPrecision {
    fn dtype(self) -> Dtype {
        match self {
            TensorPrecision::F32 => Dtype::F32,
            TensorPrecision::Bf16 => Dtype::BF16,
        }
    }

    fn encode(self, data: &[f32]) -> Vec<u8> {
        match self {
            TensorPrecision::F32 => {
                let mut bytes = vec![0u8; data.len() * mem::size_of::<f32>()];
                LittleEndian::write_f32_into(data, &mut bytes);
                bytes
            }
            TensorPrecision::Bf16 => {
                let halves = data.iter().map(|value| (value.to_bits() >> 16) as u16).collect::<Vec<_>>();
                let mut bytes = vec![0u8; halves.len() * mem::size_of::<u16>()];
                LittleEndian::write_u16_into(&halves, &mut bytes);
                bytes
            }
        }
    }
}

/// A named f32 tensor ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NamedTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            anyhow::bail!("Tensor {name} with shape {shape:?} needs {expected} values, got {}", data.len());
        }
        Ok(Self { name, shape, data })
    }

    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { name: name.into(), shape, data: vec![0.0; len] }
    }
}

/// Writes a set of tensors as a safetensors checkpoint.
#[derive(Debug, Default)]
pub struct ArtifactWriter {
    precision: TensorPrecision,
    metadata: HashMap<String, String>,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precision(mut self, precision: TensorPrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Records the head count so the checkpoint is self-describing.
    pub fn with_num_heads(self, n_heads: usize) -> Self {
        self.with_metadata(NUM_HEADS_METADATA_KEY, n_heads.to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn write(&self, output_path: &Path, tensors: &[NamedTensor]) -> Result<()> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = tensors.iter().find(|tensor| !seen.insert(tensor.name.as_str())) {
            anyhow::bail!("Duplicate tensor name {}", duplicate.name);
        }

        let buffers = tensors.iter().map(|tensor| (tensor, self.precision.encode(&tensor.data))).collect::<Vec<_>>();

        let views = buffers
            .iter()
            .map(|(tensor, bytes)| {
                let view = TensorView::new(self.precision.dtype(), tensor.shape.clone(), bytes)
                    .with_context(|| format!("Failed to prepare tensor {}", tensor.name))?;
                Ok((tensor.name.as_str(), view))
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata = (!self.metadata.is_empty()).then(|| self.metadata.clone());

        safetensors::serialize_to_file(views, &metadata, output_path)
            .with_context(|| format!("Failed to write checkpoint {}", output_path.display()))?;

        info!("💾 Written {} tensors ({:?}) to {}", tensors.len(), self.precision, output_path.display());

        Ok(())
    }
}
