//! Word-level tokenizer with BPE fallback for out-of-vocabulary words.
//!
//! - Loads the vocabulary (`word_to_id` / `id_to_word`) and the ordered merge table from JSON.
//! - Encodes whitespace-separated words directly when known; unknown words are split into
//!   characters and re-assembled with the merge table, unmatched fragments become `<UNK>`.
//! - Decodes ids back to text, dropping reserved tokens and subword boundary markers.

#[cfg(test)]
#[path = "../tests/unit/tokenizer_test.rs"]
mod tests;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Deserialize;
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

pub const BOS_TOKEN: &str = "<BOS>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";

/// Suffix appended to the checkpoint path to locate the vocabulary file.
pub const VOCABULARY_FILE_SUFFIX: &str = ".vocab.json";

/// On-disk vocabulary layout.
#[derive(Debug, Deserialize)]
struct VocabularyFile {
    word_to_id: HashMap<String, usize>,
    #[serde(default)]
    id_to_word: Option<HashMap<String, String>>,
    #[serde(default)]
    merge_table: Vec<MergeRuleEntry>,
    #[serde(default)]
    boundary_marker: Option<String>,
}

/// A merge rule is either a `["left", "right"]` pair or a `"left right"` string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MergeRuleEntry {
    Pair(String, String),
    Joined(String),
}

impl MergeRuleEntry {
    fn into_pair(self) -> Result<(String, String)> {
        match self {
            MergeRuleEntry::Pair(left, right) => Ok((left, right)),
            MergeRuleEntry::Joined(joined) => joined
                .split_once(' ')
                .map(|(left, right)| (left.to_string(), right.to_string()))
                .with_context(|| format!("Merge rule {joined:?} is not of the form \"left right\"")),
        }
    }
}

/// Bidirectional word ↔ id mapping with the reserved tokens resolved.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    word_to_id: HashMap<String, usize>,
    id_to_word: Vec<String>,
    bos_id: usize,
    eos_id: usize,
    unk_id: usize,
}

impl Vocabulary {
    /// Builds a vocabulary whose ids must cover `0..word_to_id.len()` exactly once.
    pub fn new(word_to_id: HashMap<String, usize>) -> Result<Self> {
        let vocab_size = word_to_id.len();
        let mut id_to_word = vec![None; vocab_size];

        for (word, &id) in &word_to_id {
            let slot = id_to_word
                .get_mut(id)
                .with_context(|| format!("Token id {id} for {word:?} is outside [0, {vocab_size})"))?;
            if let Some(previous) = slot.replace(word.clone()) {
                anyhow::bail!("Token id {id} is assigned to both {previous:?} and {word:?}");
            }
        }

        // Every slot is filled: ids are unique and in range for exactly vocab_size words
        let id_to_word = id_to_word.into_iter().flatten().collect::<Vec<_>>();

        let reserved = |token: &str| {
            word_to_id.get(token).copied().with_context(|| format!("Vocabulary is missing reserved token {token}"))
        };

        Ok(Self {
            bos_id: reserved(BOS_TOKEN)?,
            eos_id: reserved(EOS_TOKEN)?,
            unk_id: reserved(UNK_TOKEN)?,
            word_to_id,
            id_to_word,
        })
    }

    /// Builds a vocabulary and checks a separately stored inverse mapping against it.
    fn with_inverse(word_to_id: HashMap<String, usize>, inverse: &HashMap<String, String>) -> Result<Self> {
        let vocabulary = Self::new(word_to_id)?;

        if inverse.len() != vocabulary.len() {
            anyhow::bail!("id_to_word has {} entries, word_to_id has {}", inverse.len(), vocabulary.len());
        }

        for (id, word) in inverse {
            let id: usize = id.parse().with_context(|| format!("Invalid id {id:?} in id_to_word"))?;
            if vocabulary.word(id) != Some(word.as_str()) {
                anyhow::bail!("id_to_word maps {id} to {word:?}, which disagrees with word_to_id");
            }
        }

        Ok(vocabulary)
    }

    pub fn len(&self) -> usize {
        self.id_to_word.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_word.is_empty()
    }

    pub fn id(&self, word: &str) -> Option<usize> {
        self.word_to_id.get(word).copied()
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.id_to_word.get(id).map(String::as_str)
    }

    pub fn bos_id(&self) -> usize {
        self.bos_id
    }

    pub fn eos_id(&self) -> usize {
        self.eos_id
    }

    pub fn unk_id(&self) -> usize {
        self.unk_id
    }

    pub fn is_reserved(&self, id: usize) -> bool {
        id == self.bos_id || id == self.eos_id || id == self.unk_id
    }
}

/// Ordered merge rules; a lower rank is applied first.
#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    ranks: HashMap<(String, String), usize>,
}

impl MergeTable {
    pub fn new(rules: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut ranks = HashMap::new();
        for (rank, pair) in rules.into_iter().enumerate() {
            // a repeated rule keeps its first (highest) priority
            ranks.entry(pair).or_insert(rank);
        }
        Self { ranks }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn rank(&self, left: &str, right: &str) -> Option<usize> {
        self.ranks.get(&(left.to_string(), right.to_string())).copied()
    }

    /// Splits `word` into characters and merges adjacent fragments.
    ///
    /// Each round merges the pair with the lowest rank, taking the leftmost
    /// occurrence on ties, until no rule applies or one fragment remains.
    pub fn split(&self, word: &str) -> Vec<String> {
        let mut fragments = word.chars().map(String::from).collect::<Vec<_>>();

        while fragments.len() > 1 {
            let best = fragments
                .windows(2)
                .enumerate()
                .filter_map(|(idx, pair)| self.rank(&pair[0], &pair[1]).map(|rank| (rank, idx)))
                .min();

            let Some((_, idx)) = best else {
                break;
            };

            let right = fragments.remove(idx + 1);
            fragments[idx].push_str(&right);
        }

        fragments
    }
}

/// Tokenizer over a [`Vocabulary`] and [`MergeTable`].
#[derive(Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    merges: MergeTable,
    boundary_marker: Option<String>,
}

impl Tokenizer {
    pub fn new(vocab: Vocabulary, merges: MergeTable) -> Self {
        Self { vocab, merges, boundary_marker: None }
    }

    /// Marker stripped from fragments while decoding (e.g. `</w>`).
    pub fn with_boundary_marker(mut self, marker: Option<String>) -> Self {
        self.boundary_marker = marker.filter(|marker| !marker.is_empty());
        self
    }

    /// Loads the vocabulary stored next to a checkpoint (`<checkpoint>.vocab.json`).
    pub fn load(checkpoint_path: &Path) -> Result<Self> {
        let vocabulary_path = format!("{}{VOCABULARY_FILE_SUFFIX}", checkpoint_path.display());
        Self::from_file(Path::new(&vocabulary_path))
    }

    /// Reads a vocabulary JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open vocabulary {}", path.display()))?;
        let vocabulary_file: VocabularyFile = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse vocabulary {}", path.display()))?;

        let tokenizer = Self::from_vocabulary_file(vocabulary_file)
            .with_context(|| format!("Invalid vocabulary {}", path.display()))?;

        info!("Vocabulary loaded from {}:", path.display());
        info!("   • Tokens: {}", tokenizer.vocab_size());
        info!("   • Merge rules: {}", tokenizer.merges.len());

        Ok(tokenizer)
    }

    fn from_vocabulary_file(file: VocabularyFile) -> Result<Self> {
        let VocabularyFile { word_to_id, id_to_word, merge_table, boundary_marker } = file;

        let vocab = match id_to_word {
            Some(inverse) => Vocabulary::with_inverse(word_to_id, &inverse)?,
            None => Vocabulary::new(word_to_id)?,
        };

        let rules = merge_table.into_iter().map(MergeRuleEntry::into_pair).collect::<Result<Vec<_>>>()?;

        Ok(Self::new(vocab, MergeTable::new(rules)).with_boundary_marker(boundary_marker))
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn bos_id(&self) -> usize {
        self.vocab.bos_id()
    }

    pub fn eos_id(&self) -> usize {
        self.vocab.eos_id()
    }

    pub fn unk_id(&self) -> usize {
        self.vocab.unk_id()
    }

    /// Encodes `text` into token ids, optionally framed by `<BOS>` / `<EOS>`.
    ///
    /// Never fails: fragments missing from the vocabulary map to `<UNK>`.
    pub fn encode(&self, text: &str, include_start: bool, include_end: bool) -> Vec<usize> {
        let mut tokens = Vec::new();
        let mut unknown = 0;

        if include_start {
            tokens.push(self.bos_id());
        }

        for word in text.split_whitespace() {
            if let Some(id) = self.vocab.id(word) {
                tokens.push(id);
                continue;
            }

            for fragment in self.merges.split(word) {
                match self.vocab.id(&fragment) {
                    Some(id) => tokens.push(id),
                    None => {
                        unknown += 1;
                        tokens.push(self.unk_id());
                    }
                }
            }
        }

        if include_end {
            tokens.push(self.eos_id());
        }

        if unknown > 0 {
            debug!("{unknown} fragment(s) of {text:?} mapped to {UNK_TOKEN}");
        }

        tokens
    }

    /// Decodes ids into text, space separated.
    ///
    /// Reserved tokens and ids outside the vocabulary are skipped.
    pub fn decode(&self, tokens: &[usize]) -> String {
        let fragments = tokens
            .iter()
            .filter(|&&id| !self.vocab.is_reserved(id))
            .filter_map(|&id| self.vocab.word(id))
            .map(|word| match &self.boundary_marker {
                Some(marker) => word.replace(marker.as_str(), ""),
                None => word.to_string(),
            })
            .filter(|fragment| !fragment.is_empty())
            .collect::<Vec<_>>();

        fragments.join(" ")
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab.len())
            .field("merge_rules", &self.merges.len())
            .field("bos_token_id", &self.bos_id())
            .field("eos_token_id", &self.eos_id())
            .field("unk_token_id", &self.unk_id())
            .field("boundary_marker", &self.boundary_marker)
            .finish_non_exhaustive()
    }
}
