// In tests/streaming_tests.rs

use ndarray::{Array, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use simpls_pls::{
    center_and_store, count_lines, dot_product, LayoutPolicy, StorageLayout, StoredCenteredMatrix, DEFAULT_DELIMITER,
};
use tempfile::tempdir;

fn random_matrix(n: usize, p: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array::random_using((n, p), Uniform::new(0.0, 1.0), &mut rng)
}

fn centered(matrix: &Array2<f64>) -> Array2<f64> {
    let means = matrix.mean_axis(Axis(0)).unwrap();
    matrix - &means
}

const STREAMING_TOLERANCE: f64 = 1e-10;

fn assert_product_close(actual: ArrayView2<f64>, expected: ArrayView2<f64>, context: &str) {
    assert_eq!(actual.dim(), expected.dim(), "{}: shape mismatch", context);
    for ((idx, a), e) in actual.indexed_iter().zip(expected.iter()) {
        assert!(
            (a - e).abs() <= STREAMING_TOLERANCE,
            "{}: mismatch at {:?}: {} vs {} (diff {})",
            context,
            idx,
            a,
            e,
            (a - e).abs()
        );
    }
}

#[test]
fn streamed_product_matches_memory_across_sizes() {
    let dir = tempdir().unwrap();
    let sizes = [(4, 5), (5, 4), (37, 12), (12, 37), (200, 7), (1000, 1000)];

    for (case, &(n, p)) in sizes.iter().enumerate() {
        let x = random_matrix(n, p, 100 + case as u64);
        let y = random_matrix(n, 2, 200 + case as u64);
        let z = random_matrix(p, 3, 300 + case as u64);
        let xc = centered(&x);
        let path = dir.path().join(format!("case_{}.txt", case));

        let stored = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap();
        let expected_layout = if p < n { StorageLayout::ColumnPerLine } else { StorageLayout::RowPerLine };
        assert_eq!(stored.layout(), expected_layout, "{}x{}", n, p);
        assert_eq!(count_lines(&path).unwrap(), expected_layout.num_lines(n, p));

        // The raw streaming product sees the file's own line orientation.
        match stored.layout() {
            StorageLayout::RowPerLine => {
                let streamed = dot_product(&path, n, z.view(), DEFAULT_DELIMITER).unwrap();
                let expected = xc.dot(&z);
                assert_product_close(streamed.view(), expected.view(), "X·Z by row");
            }
            StorageLayout::ColumnPerLine => {
                let streamed = dot_product(&path, p, y.view(), DEFAULT_DELIMITER).unwrap();
                let expected = xc.t().dot(&y);
                assert_product_close(streamed.view(), expected.view(), "Xᵗ·Y by column");
            }
        }

        // The handle serves both products in either layout.
        let xty = stored.t_dot(y.view()).unwrap();
        assert_product_close(xty.view(), xc.t().dot(&y).view(), "handle Xᵗ·Y");
        let xz = stored.dot(z.view()).unwrap();
        assert_product_close(xz.view(), xc.dot(&z).view(), "handle X·Z");
    }
}

#[test]
fn layout_follows_the_line_count_rule() {
    let dir = tempdir().unwrap();

    // 4 rows, 3 columns: fewer lines when each column becomes a line.
    let tall = random_matrix(4, 3, 1);
    let stored = center_and_store(&tall, dir.path().join("tall.txt"), LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER)
        .unwrap();
    assert_eq!(stored.layout(), StorageLayout::ColumnPerLine);
    assert!(!stored.layout().is_by_row());

    let wide = random_matrix(3, 4, 2);
    let stored = center_and_store(&wide, dir.path().join("wide.txt"), LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER)
        .unwrap();
    assert_eq!(stored.layout(), StorageLayout::RowPerLine);
    assert!(stored.layout().is_by_row());

    let forced = center_and_store(&tall, dir.path().join("forced.txt"), LayoutPolicy::RowPerLine, DEFAULT_DELIMITER)
        .unwrap();
    assert_eq!(forced.layout(), StorageLayout::RowPerLine);
    assert_eq!(count_lines(forced.path()).unwrap(), 4);
}

#[test]
fn reopened_file_reproduces_the_centered_matrix() {
    let dir = tempdir().unwrap();
    let x = random_matrix(9, 6, 3);
    let path = dir.path().join("reopen.txt");
    let written = center_and_store(&x, &path, LayoutPolicy::ColumnPerLine, ';').unwrap();

    let reopened = StoredCenteredMatrix::open(&path, StorageLayout::ColumnPerLine, ';').unwrap();
    assert_eq!((reopened.nrows(), reopened.ncols()), (9, 6));
    assert_eq!(reopened.load_dense().unwrap(), centered(&x));
    assert_eq!(written.load_dense().unwrap(), reopened.load_dense().unwrap());

    let column_sums = reopened.load_dense().unwrap().sum_axis(Axis(0));
    assert!(column_sums.iter().all(|s| s.abs() < 1e-12));
}
