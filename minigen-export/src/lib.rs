//! # minigen-export
//!
//! Writes minigen model artifacts: a safetensors checkpoint plus the
//! `<checkpoint>.vocab.json` vocabulary that sits next to it.
//!
//! ## Examples
//!
//! ### Initialising a model for a vocabulary
//!
//! ```rust,no_run
//! use minigen_export::{ModelShape, init_model};
//!
//! # fn main() -> anyhow::Result<()> {
//! let shape = ModelShape { dim: 64, hidden_dim: 256, n_blocks: 2, n_heads: 4, max_context_length: 32 };
//!
//! init_model("words.json", "output/model.safetensors", shape, 42)?;
//! # Ok(())
//! # }
//! ```

pub mod artifact_writer;
pub mod model_initializer;
pub mod vocabulary_exporter;

pub use artifact_writer::{ArtifactWriter, NUM_HEADS_METADATA_KEY, NamedTensor, TensorPrecision};
pub use model_initializer::{DEFAULT_INIT_STD, ModelInitializer, ModelShape};
pub use vocabulary_exporter::{VOCABULARY_FILE_SUFFIX, VocabularyData, VocabularyExporter};

use anyhow::Result;
use log::info;
use std::path::Path;

/// Writes a randomly initialised artifact for the vocabulary at `vocab_path`.
///
/// That is:
/// - load the vocabulary (reserved tokens are added when missing)
/// - draw every weight from a seeded normal distribution, output bias at zero
/// - write the checkpoint with its `num_heads` metadata, then the vocabulary file
pub fn init_model(
    vocab_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    shape: ModelShape,
    seed: u64,
) -> Result<()> {
    let vocab_path = vocab_path.as_ref();
    let output_path = output_path.as_ref();

    info!("🚀 Initialising model for {}", vocab_path.display());

    let exporter = VocabularyExporter::new();
    let vocabulary = exporter.load(vocab_path)?;

    let tensors = ModelInitializer::new(shape, seed)?.initialize(vocabulary.len())?;

    ArtifactWriter::new().with_num_heads(shape.n_heads).write(output_path, &tensors)?;
    exporter.export(&vocabulary, output_path)?;

    info!("✅ Model artifact ready at {}", output_path.display());
    Ok(())
}
