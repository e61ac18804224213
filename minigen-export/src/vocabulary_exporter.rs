#[cfg(test)]
#[path = "../tests/unit/vocabulary_exporter_test.rs"]
mod tests;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashSet},
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub const BOS_TOKEN: &str = "<BOS>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";

/// Suffix appended to the checkpoint path for the vocabulary file.
pub const VOCABULARY_FILE_SUFFIX: &str = ".vocab.json";

const RESERVED_TOKENS: [&str; 3] = [BOS_TOKEN, EOS_TOKEN, UNK_TOKEN];

/// Vocabulary as it will be written: `words[id]` is the word for `id`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VocabularyData {
    pub words: Vec<String>,
    pub merges: Vec<(String, String)>,
    pub boundary_marker: Option<String>,
}

impl VocabularyData {
    /// Reserved tokens take ids 0, 1 and 2; the words follow in order, duplicates skipped.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocabulary = Self::default();
        let mut seen = HashSet::new();

        for word in RESERVED_TOKENS.iter().map(|token| token.to_string()).chain(words.into_iter().map(Into::into)) {
            if !word.is_empty() && seen.insert(word.clone()) {
                vocabulary.words.push(word);
            }
        }

        vocabulary
    }

    pub fn with_merges(mut self, merges: Vec<(String, String)>) -> Self {
        self.merges = merges;
        self
    }

    pub fn with_boundary_marker(mut self, marker: Option<String>) -> Self {
        self.boundary_marker = marker;
        self
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn id(&self, word: &str) -> Option<usize> {
        self.words.iter().position(|candidate| candidate == word)
    }

    /// Appends any reserved token the vocabulary lacks, keeping existing ids stable.
    fn ensure_reserved(&mut self) {
        for token in RESERVED_TOKENS {
            if !self.words.iter().any(|word| word == token) {
                warn!("Vocabulary is missing {token}, assigning id {}", self.words.len());
                self.words.push(token.to_string());
            }
        }
    }
}

#[derive(Serialize)]
struct VocabularyFile<'a> {
    word_to_id: BTreeMap<&'a str, usize>,
    id_to_word: BTreeMap<String, &'a str>,
    merge_table: &'a [(String, String)],
    #[serde(skip_serializing_if = "Option::is_none")]
    boundary_marker: Option<&'a str>,
}

/// Reads vocabulary sources and writes the `<checkpoint>.vocab.json` file.
#[derive(Debug, Default)]
pub struct VocabularyExporter;

impl VocabularyExporter {
    pub const fn new() -> Self {
        Self
    }

    /// Path of the vocabulary file that belongs to `checkpoint_path`.
    pub fn vocabulary_path(checkpoint_path: &Path) -> PathBuf {
        PathBuf::from(format!("{}{VOCABULARY_FILE_SUFFIX}", checkpoint_path.display()))
    }

    /// Loads a vocabulary source.
    ///
    /// Accepted inputs:
    /// - a JSON object with `word_to_id` and optional `merge_table` / `boundary_marker`
    /// - a JSON array of words
    /// - any other file as a plain word list, whitespace separated
    pub fn load(&self, path: &Path) -> Result<VocabularyData> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read vocabulary source {}", path.display()))?;

        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        let vocabulary = if is_json {
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse vocabulary source {}", path.display()))?;
            self.parse_json(&value).with_context(|| format!("Invalid vocabulary source {}", path.display()))?
        } else {
            VocabularyData::from_words(content.split_whitespace())
        };

        info!("📊 Found {} tokens and {} merge rules in {}", vocabulary.len(), vocabulary.merges.len(), path.display());

        Ok(vocabulary)
    }

    fn parse_json(&self, value: &Value) -> Result<VocabularyData> {
        match value {
            Value::Array(words) => {
                let words = words
                    .iter()
                    .map(|word| word.as_str().context("Word list entries must be strings"))
                    .collect::<Result<Vec<_>>>()?;
                Ok(VocabularyData::from_words(words))
            }
            Value::Object(object) => {
                let word_to_id = object
                    .get("word_to_id")
                    .and_then(Value::as_object)
                    .context("Missing word_to_id object")?;

                let mut words = vec![None; word_to_id.len()];
                for (word, id) in word_to_id {
                    let id = id.as_u64().with_context(|| format!("Id of {word:?} is not a non-negative integer"))?;
                    let slot = words
                        .get_mut(id as usize)
                        .with_context(|| format!("Id {id} of {word:?} is outside [0, {})", word_to_id.len()))?;
                    if slot.replace(word.clone()).is_some() {
                        anyhow::bail!("Id {id} is assigned more than once");
                    }
                }

                let merges = match object.get("merge_table") {
                    Some(Value::Array(rules)) => rules.iter().map(parse_merge_rule).collect::<Result<Vec<_>>>()?,
                    Some(Value::Null) | None => Vec::new(),
                    Some(_) => anyhow::bail!("merge_table must be an array"),
                };

                let boundary_marker = object.get("boundary_marker").and_then(Value::as_str).map(str::to_string);

                let mut vocabulary = VocabularyData {
                    words: words.into_iter().flatten().collect(),
                    merges,
                    boundary_marker,
                };
                vocabulary.ensure_reserved();

                Ok(vocabulary)
            }
            _ => anyhow::bail!("Expected a JSON object or array"),
        }
    }

    /// Writes `<checkpoint>.vocab.json` and returns its path.
    pub fn export(&self, vocabulary: &VocabularyData, checkpoint_path: &Path) -> Result<PathBuf> {
        for token in RESERVED_TOKENS {
            if vocabulary.id(token).is_none() {
                anyhow::bail!("Vocabulary is missing reserved token {token}");
            }
        }

        let file = VocabularyFile {
            word_to_id: vocabulary.words.iter().enumerate().map(|(id, word)| (word.as_str(), id)).collect(),
            id_to_word: vocabulary.words.iter().enumerate().map(|(id, word)| (id.to_string(), word.as_str())).collect(),
            merge_table: &vocabulary.merges,
            boundary_marker: vocabulary.boundary_marker.as_deref(),
        };

        if file.word_to_id.len() != vocabulary.len() {
            anyhow::bail!("Vocabulary contains duplicate words");
        }

        let output_path = Self::vocabulary_path(checkpoint_path);
        let mut writer = BufWriter::new(
            File::create(&output_path).with_context(|| format!("Failed to create {}", output_path.display()))?,
        );
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.flush()?;

        info!("💾 Written vocabulary to {}", output_path.display());

        Ok(output_path)
    }
}

fn parse_merge_rule(rule: &Value) -> Result<(String, String)> {
    match rule {
        Value::Array(pair) => match pair.as_slice() {
            [Value::String(left), Value::String(right)] => Ok((left.clone(), right.clone())),
            _ => anyhow::bail!("Merge rule {rule} must be a pair of strings"),
        },
        Value::String(joined) => joined
            .split_once(' ')
            .map(|(left, right)| (left.to_string(), right.to_string()))
            .with_context(|| format!("Merge rule {joined:?} is not of the form \"left right\"")),
        _ => anyhow::bail!("Unsupported merge rule {rule}"),
    }
}
