use super::*;

#[test]
fn test_matmul_known_values() {
    let x = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let w = Matrix::from_rows(&[vec![5.0, 6.0, 7.0], vec![8.0, 9.0, 10.0]]).unwrap();

    let out = matmul(&x, &w);

    assert_eq!(out.shape(), (2, 3));
    assert_eq!(out.row(0), &[21.0, 24.0, 27.0]);
    assert_eq!(out.row(1), &[47.0, 54.0, 61.0]);
}

#[test]
fn test_matmul_transposed_matches_explicit_transpose() {
    let x = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let w = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]).unwrap();
    let w_t = Matrix::from_rows(&[vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 1.0]]).unwrap();

    let out = matmul_transposed(&x, &w);

    assert_eq!(out.shape(), (2, 3));
    assert_eq!(out.row(0), &[1.0, 2.0, 3.0]);
    assert_eq!(out.row(1), &[3.0, 4.0, 7.0]);
    assert_eq!(out, matmul(&x, &w_t));
}

#[test]
fn test_from_vec_rejects_wrong_size() {
    let result = Matrix::from_vec(2, 3, vec![0.0; 5]);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("size mismatch"));
}

#[test]
fn test_from_rows_rejects_ragged_rows() {
    let result = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
    assert!(result.is_err());
}

#[test]
fn test_residual_and_bias() {
    let mut x = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
    let delta = Matrix::from_rows(&[vec![0.5, 0.5], vec![-1.0, -1.0]]).unwrap();

    x.add_assign(&delta);
    x.add_row_vector(&[10.0, 20.0]);

    assert_eq!(x.row(0), &[11.5, 22.5]);
    assert_eq!(x.row(1), &[12.0, 23.0]);
}

#[test]
fn test_last_row() {
    let x = Matrix::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();

    assert_eq!(x.last_row(), Some(&[3.0][..]));
    assert_eq!(Matrix::zeros(0, 4).last_row(), None);
}
