use super::*;

use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_from_words_puts_reserved_first() {
    let vocabulary = VocabularyData::from_words(["hi", "there", "hi", "<EOS>", ""]);

    assert_eq!(vocabulary.words, vec!["<BOS>", "<EOS>", "<UNK>", "hi", "there"]);
    assert_eq!(vocabulary.id("there"), Some(4));
    assert_eq!(vocabulary.id("missing"), None);
}

#[test]
fn test_load_plain_word_list() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "words.txt", "the cat\nsat\n\n on the mat\n");

    let vocabulary = VocabularyExporter::new().load(&path).unwrap();

    assert_eq!(vocabulary.words, vec!["<BOS>", "<EOS>", "<UNK>", "the", "cat", "sat", "on", "mat"]);
    assert!(vocabulary.merges.is_empty());
}

#[test]
fn test_load_json_array() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "words.json", r#"["a", "b"]"#);

    let vocabulary = VocabularyExporter::new().load(&path).unwrap();

    assert_eq!(vocabulary.len(), 5);
    assert_eq!(vocabulary.id("b"), Some(4));
}

#[test]
fn test_load_json_object_keeps_ids() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "vocab.json",
        r#"{
            "word_to_id": {"hi": 0, "<BOS>": 1, "<EOS>": 2},
            "merge_table": [["h", "i"], "t h"],
            "boundary_marker": "</w>"
        }"#,
    );

    let vocabulary = VocabularyExporter::new().load(&path).unwrap();

    assert_eq!(vocabulary.words, vec!["hi", "<BOS>", "<EOS>", "<UNK>"]);
    assert_eq!(vocabulary.merges, vec![("h".to_string(), "i".to_string()), ("t".to_string(), "h".to_string())]);
    assert_eq!(vocabulary.boundary_marker.as_deref(), Some("</w>"));
}

#[test]
fn test_load_rejects_bad_ids() {
    let dir = TempDir::new().unwrap();
    let exporter = VocabularyExporter::new();

    let gap = write(&dir, "gap.json", r#"{"word_to_id": {"a": 0, "b": 2}}"#);
    assert!(exporter.load(&gap).is_err());

    let duplicate = write(&dir, "duplicate.json", r#"{"word_to_id": {"a": 0, "b": 0}}"#);
    assert!(exporter.load(&duplicate).is_err());

    let negative = write(&dir, "negative.json", r#"{"word_to_id": {"a": -1}}"#);
    assert!(exporter.load(&negative).is_err());

    let bad_rule = write(&dir, "rule.json", r#"{"word_to_id": {"a": 0}, "merge_table": ["ab"]}"#);
    assert!(exporter.load(&bad_rule).is_err());

    assert!(exporter.load(&dir.path().join("missing.json")).is_err());
}

#[test]
fn test_export_writes_both_directions() {
    let dir = TempDir::new().unwrap();
    let checkpoint = dir.path().join("model.safetensors");
    let vocabulary = VocabularyData::from_words(["hi", "there"])
        .with_merges(vec![("t".to_string(), "h".to_string())])
        .with_boundary_marker(Some("</w>".to_string()));

    let path = VocabularyExporter::new().export(&vocabulary, &checkpoint).unwrap();

    assert_eq!(path, dir.path().join("model.safetensors.vocab.json"));
    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["word_to_id"]["<BOS>"], 0);
    assert_eq!(value["word_to_id"]["there"], 4);
    assert_eq!(value["id_to_word"]["3"], "hi");
    assert_eq!(value["merge_table"][0][0], "t");
    assert_eq!(value["merge_table"][0][1], "h");
    assert_eq!(value["boundary_marker"], "</w>");
}

#[test]
fn test_export_requires_reserved_tokens() {
    let dir = TempDir::new().unwrap();
    let vocabulary = VocabularyData { words: vec!["hi".to_string()], ..Default::default() };

    let result = VocabularyExporter::new().export(&vocabulary, &dir.path().join("model.safetensors"));

    assert!(result.is_err());
}
