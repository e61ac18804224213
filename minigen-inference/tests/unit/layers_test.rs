use super::*;

fn matrix(rows: usize, cols: usize, seed: usize) -> Matrix {
    let data = (0..rows * cols).map(|i| (((i * 37 + seed * 101) % 97) as f32 / 97.0 - 0.5) * 0.8).collect();
    Matrix::from_vec(rows, cols, data).unwrap()
}

fn identity(dim: usize) -> Matrix {
    let mut m = Matrix::zeros(dim, dim);
    (0..dim).for_each(|i| m.row_mut(i)[i] = 1.0);
    m
}

#[test]
fn test_layer_norm_zero_mean_unit_variance() {
    let norm = LayerNorm::new(1e-5);

    for seq_len in 1..=8 {
        let data = (0..seq_len * 16).map(|i| ((i * 7 + (i / 16) * 3) % 11) as f32 - 5.0 + (i / 16) as f32).collect();
        let mut x = Matrix::from_vec(seq_len, 16, data).unwrap();

        norm.forward_inplace(&mut x);

        for row in x.iter_rows() {
            let n = row.len() as f64;
            let mean = row.iter().map(|&v| v as f64).sum::<f64>() / n;
            let variance = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 1e-4, "mean {mean}");
            assert!((variance - 1.0).abs() < 1e-4, "variance {variance}");
        }
    }
}

#[test]
fn test_layer_norm_small_scale_rows_reach_unit_variance() {
    let norm = LayerNorm::new(crate::configuration::DEFAULT_NORM_EPS);
    let data = (0..4 * 32).map(|i| (((i * 37) % 97) as f32 / 97.0 - 0.5) * 0.07).collect();
    let mut x = Matrix::from_vec(4, 32, data).unwrap();

    norm.forward_inplace(&mut x);

    for row in x.iter_rows() {
        let n = row.len() as f64;
        let mean = row.iter().map(|&v| v as f64).sum::<f64>() / n;
        let variance = row.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-4, "mean {mean}");
        assert!((variance - 1.0).abs() < 1e-4, "variance {variance}");
    }
}

#[test]
fn test_layer_norm_constant_row_stays_finite() {
    let norm = LayerNorm::new(1e-5);
    let mut row = [3.0f32; 8];

    norm.normalize_row(&mut row);

    assert!(row.iter().all(|&v| v == 0.0));
}

#[test]
fn test_attention_rows_sum_to_one() {
    let attention = MultiHeadAttention::new(
        Linear::new(matrix(8, 8, 1)),
        Linear::new(matrix(8, 8, 2)),
        Linear::new(matrix(8, 8, 3)),
        2,
    );
    let x = matrix(5, 8, 4);

    let weights = attention.attention_weights(&x);

    assert_eq!(weights.len(), 2);
    for head in &weights {
        assert_eq!(head.shape(), (5, 5));
        for row in head.iter_rows() {
            let sum = row.iter().map(|&w| w as f64).sum::<f64>();
            assert!((sum - 1.0).abs() < 1e-6, "row sum {sum}");
            assert!(row.iter().all(|&w| w >= 0.0));
        }
    }
}

#[test]
fn test_attention_sees_later_positions() {
    let attention = MultiHeadAttention::new(
        Linear::new(matrix(4, 4, 5)),
        Linear::new(matrix(4, 4, 6)),
        Linear::new(matrix(4, 4, 7)),
        1,
    );
    let x = matrix(3, 4, 8);

    let weights = attention.attention_weights(&x);

    assert!(weights[0].row(0)[2] > 0.0);
}

#[test]
fn test_attention_heads_concatenate_without_projection() {
    // zero queries and keys give uniform weights, so every position averages V
    let attention = MultiHeadAttention::new(
        Linear::new(Matrix::zeros(2, 2)),
        Linear::new(Matrix::zeros(2, 2)),
        Linear::new(identity(2)),
        2,
    );
    let x = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();

    let output = attention.forward(&x);

    assert_eq!(attention.head_dim, 1);
    assert_eq!(output.shape(), (2, 2));
    assert_eq!(output.row(0), &[0.5, 0.5]);
    assert_eq!(output.row(1), &[0.5, 0.5]);
}

#[test]
fn test_feed_forward_applies_relu() {
    let ffn = FeedForward::new(Linear::new(identity(2)), Linear::new(identity(2)));
    let x = Matrix::from_rows(&[vec![1.0, -2.0], vec![-0.5, 3.0]]).unwrap();

    let output = ffn.forward(&x);

    assert_eq!(output.row(0), &[1.0, 0.0]);
    assert_eq!(output.row(1), &[0.0, 3.0]);
}

#[test]
fn test_tied_output_head() {
    let embedding = TokenEmbedding::new(Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap());
    let head = TiedOutputHead::new(vec![0.5, 0.0, -1.0]);
    let x = Matrix::from_rows(&[vec![2.0, 3.0]]).unwrap();

    let logits = head.forward(&x, &embedding);

    assert_eq!(logits.row(0), &[2.5, 3.0, 4.0]);
}

#[test]
fn test_embeddings_add_position_rows() {
    let tokens = TokenEmbedding::new(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap());
    let positions = PositionalEmbedding::new(Matrix::from_rows(&[vec![0.1, 0.1], vec![0.2, 0.2], vec![0.3, 0.3]]).unwrap());

    let mut x = tokens.forward(&[1, 0]);
    positions.forward_inplace(&mut x);

    let expected: [f32; 4] = [3.1, 4.1, 1.2, 2.2];
    for (actual, expected) in x.as_slice().iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }
}

#[test]
fn test_softmax() {
    let mut values = [1.0, 2.0, 3.0];
    softmax(&mut values);

    let sum = values.iter().sum::<f32>();
    assert!((sum - 1.0).abs() < 1e-6);
    assert!(values[0] < values[1] && values[1] < values[2]);

    let mut equal = [7.0; 4];
    softmax(&mut equal);
    assert!(equal.iter().all(|&p| (p - 0.25).abs() < 1e-7));
}
