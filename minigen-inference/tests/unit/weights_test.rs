use super::*;

fn filled(len: usize, offset: usize) -> Vec<f32> {
    (0..len).map(|i| ((i + offset) % 7) as f32 * 0.1 - 0.3).collect()
}

fn tensor_set(vocab_size: usize, dim: usize, hidden_dim: usize, ctx: usize, blocks: &[usize]) -> TensorSet {
    let mut tensors = TensorSet::default();
    tensors.insert(EMBEDDING_TENSOR, vec![vocab_size, dim], filled(vocab_size * dim, 0));
    tensors.insert(POSITIONAL_EMBEDDING_TENSOR, vec![ctx, dim], filled(ctx * dim, 1));
    tensors.insert(OUTPUT_BIAS_TENSOR, vec![vocab_size], filled(vocab_size, 2));

    for &idx in blocks {
        tensors.insert(&format!("WQ_{idx}"), vec![dim, dim], filled(dim * dim, 3));
        tensors.insert(&format!("WK_{idx}"), vec![dim, dim], filled(dim * dim, 4));
        tensors.insert(&format!("WV_{idx}"), vec![dim, dim], filled(dim * dim, 5));
        tensors.insert(&format!("W1_{idx}"), vec![dim, hidden_dim], filled(dim * hidden_dim, 6));
        tensors.insert(&format!("W2_{idx}"), vec![hidden_dim, dim], filled(hidden_dim * dim, 0));
    }

    tensors
}

#[test]
fn test_block_count_derived_from_highest_index() {
    let weights = ModelWeights::from_tensors(tensor_set(6, 4, 8, 5, &[0, 1, 2])).unwrap();

    assert_eq!(weights.blocks.len(), 3);
    assert_eq!(weights.dim(), 4);
    assert_eq!(weights.hidden_dim(), 8);
    assert_eq!(weights.vocab_size(), 6);
    assert_eq!(weights.max_context_length(), 5);
}

#[test]
fn test_model_without_blocks_is_accepted() {
    let weights = ModelWeights::from_tensors(tensor_set(6, 4, 8, 5, &[])).unwrap();
    assert!(weights.blocks.is_empty());
    assert_eq!(weights.hidden_dim(), 0);
}

#[test]
fn test_gap_in_block_indices_is_reported() {
    let result = ModelWeights::from_tensors(tensor_set(6, 4, 8, 5, &[0, 2]));

    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("Missing tensor WQ_1"), "{message}");
}

#[test]
fn test_inconsistent_dim_is_rejected() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[0]);
    tensors.insert("WQ_0", vec![3, 3], filled(9, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("WQ_0 has shape"), "{message}");
}

#[test]
fn test_positional_dim_mismatch_is_rejected() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[0]);
    tensors.insert(POSITIONAL_EMBEDDING_TENSOR, vec![5, 3], filled(15, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("positional_embedding"), "{message}");
}

#[test]
fn test_output_bias_length_mismatch_is_rejected() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[0]);
    tensors.insert(OUTPUT_BIAS_TENSOR, vec![5], filled(5, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("does not match vocabulary size"), "{message}");
}

#[test]
fn test_embedding_must_be_two_dimensional() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[]);
    tensors.insert(EMBEDDING_TENSOR, vec![24], filled(24, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("must be 2-D"), "{message}");
}

#[test]
fn test_invalid_block_suffix_is_rejected() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[0]);
    tensors.insert("WQ_x", vec![4, 4], filled(16, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("Invalid block index"), "{message}");
}

#[test]
fn test_maximal_block_index_is_rejected() {
    let mut tensors = tensor_set(6, 4, 8, 5, &[]);
    tensors.insert(&format!("WQ_{}", usize::MAX), vec![4, 4], filled(16, 0));

    let message = format!("{:#}", ModelWeights::from_tensors(tensors).unwrap_err());
    assert!(message.contains("out of range"), "{message}");
}
