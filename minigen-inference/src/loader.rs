use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use memmap2::Mmap;
use safetensors::SafeTensors;
use std::{
    collections::HashMap,
    fs::File,
    mem,
    path::{Path, PathBuf},
};

use crate::tensor::Matrix;

/// Reads every tensor of a safetensors checkpoint into owned `f32` buffers.
#[derive(Debug)]
pub(crate) struct TensorReader {
    path: PathBuf,
    mmap: Mmap,
}

impl TensorReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open checkpoint: {}", path.display()))?;

        // SAFETY: file-backed maps are UB if the file is modified while mapped; the
        // mapping only lives for the duration of `read`.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("Failed to memory map {}", path.display()))?;

        Ok(Self { path: path.to_path_buf(), mmap })
    }

    /// Deserializes the checkpoint and converts all tensors to F32.
    pub fn read(&self) -> Result<TensorSet> {
        let safetensors = SafeTensors::deserialize(&self.mmap)
            .with_context(|| format!("Failed to deserialize {}", self.path.display()))?;

        let (_, header) = SafeTensors::read_metadata(&self.mmap)
            .with_context(|| format!("Failed to read header of {}", self.path.display()))?;
        let metadata = header.metadata().clone().unwrap_or_default();

        let tensors = safetensors
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                let data = convert_tensor_to_f32(&view, &name)?;
                Ok((name, RawTensor { shape: view.shape().to_vec(), data }))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        debug!("Read {} tensors from {}", tensors.len(), self.path.display());

        Ok(TensorSet { tensors, metadata })
    }
}

#[derive(Debug)]
pub(crate) struct RawTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Named tensors plus the string metadata stored in the checkpoint header.
#[derive(Debug, Default)]
pub(crate) struct TensorSet {
    tensors: HashMap<String, RawTensor>,
    metadata: HashMap<String, String>,
}

impl TensorSet {
    #[cfg(test)]
    pub fn insert(&mut self, name: &str, shape: Vec<usize>, data: Vec<f32>) {
        self.tensors.insert(name.to_string(), RawTensor { shape, data });
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Removes a required 2-D tensor.
    pub fn take_matrix(&mut self, name: &str) -> Result<Matrix> {
        let tensor = self.tensors.remove(name).with_context(|| format!("Missing tensor {name}"))?;
        match tensor.shape.as_slice() {
            &[rows, cols] => Matrix::from_vec(rows, cols, tensor.data).with_context(|| format!("Corrupt tensor {name}")),
            shape => anyhow::bail!("Tensor {name} must be 2-D, got shape {shape:?}"),
        }
    }

    /// Removes a required vector; `[n]` and `[1, n]` shapes are accepted.
    pub fn take_vector(&mut self, name: &str) -> Result<Vec<f32>> {
        let tensor = self.tensors.remove(name).with_context(|| format!("Missing tensor {name}"))?;
        match tensor.shape.as_slice() {
            &[_] | &[1, _] => Ok(tensor.data),
            shape => anyhow::bail!("Tensor {name} must be 1-D, got shape {shape:?}"),
        }
    }
}

/// Convert tensor data to f32 based on its data type
fn convert_tensor_to_f32(tensor_view: &safetensors::tensor::TensorView, tensor_name: &str) -> Result<Vec<f32>> {
    let tensor_data = tensor_view.data();
    let expected_elements = tensor_view.shape().iter().product::<usize>();

    match tensor_view.dtype() {
        safetensors::Dtype::F32 => {
            validate_tensor_size(tensor_data.len(), expected_elements * mem::size_of::<f32>(), tensor_name, "F32")?;
            let mut values = vec![0.0; expected_elements];
            LittleEndian::read_f32_into(tensor_data, &mut values);
            Ok(values)
        }
        safetensors::Dtype::BF16 => {
            validate_tensor_size(tensor_data.len(), expected_elements * 2, tensor_name, "BF16")?;
            Ok(tensor_data
                .chunks_exact(2)
                .map(|chunk| {
                    // BF16 is the upper half of an F32
                    let bf16_bits = LittleEndian::read_u16(chunk);
                    f32::from_bits((bf16_bits as u32) << 16)
                })
                .collect())
        }
        dtype => anyhow::bail!("Unsupported tensor dtype {dtype:?} for {tensor_name}"),
    }
}

fn validate_tensor_size(actual_bytes: usize, expected_bytes: usize, tensor_name: &str, dtype_name: &str) -> Result<()> {
    if actual_bytes != expected_bytes {
        anyhow::bail!(
            "{dtype_name} tensor {tensor_name} size mismatch. Expected {expected_bytes} bytes, got {actual_bytes}"
        );
    }
    Ok(())
}
