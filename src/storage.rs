// src/storage.rs
//
// Out-of-core storage for centered predictor matrices.
//
// Centering a sparse matrix makes it dense, so the centered values are written
// to a plain-text file instead of being materialized in memory. Every product
// the SIMPLS engine needs is then computed by streaming that file one line at a
// time: peak memory is a single line plus the product being accumulated.

use crate::error::{PlsError, PlsResult};
use log::{debug, info, trace};
use memchr::memchr_iter;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Separator written between values on a line.
pub const DEFAULT_DELIMITER: char = '\t';

/// Size of the binary chunks read by [`count_lines`].
const LINE_COUNT_CHUNK_BYTES: usize = 1024 * 1024;

/// What one line of a stored matrix file represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageLayout {
    /// Line `i` holds observation (row) `i`.
    RowPerLine,
    /// Line `j` holds the full column `j`, written transposed onto one line.
    ColumnPerLine,
}

impl StorageLayout {
    pub fn is_by_row(self) -> bool {
        matches!(self, StorageLayout::RowPerLine)
    }

    /// Number of lines a matrix of the given shape occupies in this layout.
    pub fn num_lines(self, nrows: usize, ncols: usize) -> usize {
        match self {
            StorageLayout::RowPerLine => nrows,
            StorageLayout::ColumnPerLine => ncols,
        }
    }
}

/// How [`center_and_store`] picks a [`StorageLayout`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutPolicy {
    /// Column-per-line when `ncols < nrows`, row-per-line otherwise. Fewer,
    /// longer lines amortize the per-line parsing cost of later streaming.
    #[default]
    MinimizeLines,
    RowPerLine,
    ColumnPerLine,
}

impl LayoutPolicy {
    pub fn choose(self, nrows: usize, ncols: usize) -> StorageLayout {
        match self {
            LayoutPolicy::MinimizeLines => {
                if ncols < nrows {
                    StorageLayout::ColumnPerLine
                } else {
                    StorageLayout::RowPerLine
                }
            }
            LayoutPolicy::RowPerLine => StorageLayout::RowPerLine,
            LayoutPolicy::ColumnPerLine => StorageLayout::ColumnPerLine,
        }
    }
}

// --- Raw (uncentered) matrix access ---

/// Read access to a raw predictor matrix that is about to be centered.
///
/// Implement this for sparse or otherwise compressed storage; the centering
/// store only ever asks for one row or one column at a time.
pub trait RawMatrix {
    /// `(nrows, ncols)`.
    fn shape(&self) -> (usize, usize);

    /// Dense copy of row `i`.
    fn row(&self, i: usize) -> Array1<f64>;

    /// Dense copy of column `j`.
    fn column(&self, j: usize) -> Array1<f64>;

    /// Column means. The default sums rows one at a time.
    fn column_means(&self) -> Array1<f64> {
        let (nrows, ncols) = self.shape();
        let mut sums = Array1::<f64>::zeros(ncols);
        for i in 0..nrows {
            sums += &self.row(i);
        }
        if nrows > 0 {
            sums /= nrows as f64;
        }
        sums
    }
}

impl RawMatrix for ArrayView2<'_, f64> {
    fn shape(&self) -> (usize, usize) {
        self.dim()
    }

    fn row(&self, i: usize) -> Array1<f64> {
        self.index_axis(Axis(0), i).to_owned()
    }

    fn column(&self, j: usize) -> Array1<f64> {
        self.index_axis(Axis(1), j).to_owned()
    }

    fn column_means(&self) -> Array1<f64> {
        self.mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.ncols()))
    }
}

impl RawMatrix for Array2<f64> {
    fn shape(&self) -> (usize, usize) {
        self.dim()
    }

    fn row(&self, i: usize) -> Array1<f64> {
        RawMatrix::row(&self.view(), i)
    }

    fn column(&self, j: usize) -> Array1<f64> {
        RawMatrix::column(&self.view(), j)
    }

    fn column_means(&self) -> Array1<f64> {
        self.view().column_means()
    }
}

/// A subset of the rows of another [`RawMatrix`], in the given order.
/// Used to store training folds without copying the source matrix.
#[derive(Debug, Clone, Copy)]
pub struct RowSubset<'a, M: ?Sized> {
    inner: &'a M,
    rows: &'a [usize],
}

impl<'a, M: RawMatrix + ?Sized> RowSubset<'a, M> {
    pub fn new(inner: &'a M, rows: &'a [usize]) -> Self {
        Self { inner, rows }
    }
}

impl<M: RawMatrix + ?Sized> RawMatrix for RowSubset<'_, M> {
    fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.inner.shape().1)
    }

    fn row(&self, i: usize) -> Array1<f64> {
        self.inner.row(self.rows[i])
    }

    fn column(&self, j: usize) -> Array1<f64> {
        let full = self.inner.column(j);
        self.rows.iter().map(|&i| full[i]).collect()
    }
}

// --- Line counter ---

/// Counts the `\n`-terminated records in a file.
///
/// The file is read in 1 MiB binary chunks instead of line by line, so this
/// is cheap enough to size result buffers before a full parse.
pub fn count_lines<P: AsRef<Path>>(path: P) -> PlsResult<usize> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| PlsError::io(path, e))?;
    let mut chunk = vec![0u8; LINE_COUNT_CHUNK_BYTES];
    let mut line_count = 0usize;
    loop {
        let bytes_read = match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PlsError::io(path, e)),
        };
        line_count += memchr_iter(b'\n', &chunk[..bytes_read]).count();
    }
    trace!("Counted {} lines in {:?}", line_count, path);
    Ok(line_count)
}

// --- Centering store ---

/// Handle to a centered matrix stored on disk by [`center_and_store`] or
/// reopened with [`StoredCenteredMatrix::open`].
///
/// The handle describes the *logical* matrix X (`nrows` × `ncols`); the
/// [`StorageLayout`] says how it was laid out on lines.
#[derive(Debug, Clone)]
pub struct StoredCenteredMatrix {
    path: PathBuf,
    nrows: usize,
    ncols: usize,
    layout: StorageLayout,
    delimiter: char,
    column_means: Option<Array1<f64>>,
    sum_of_squares: f64,
}

/// Centers `matrix` column-wise and writes the centered values to `path`.
///
/// The centered matrix is never held in memory: each row (or column) is
/// fetched, centered, written and dropped. The layout comes from `policy`;
/// read it back with [`StoredCenteredMatrix::layout`]. The target file is
/// created or truncated. A failure part-way leaves an unusable file behind and
/// is reported as [`PlsError::Io`].
pub fn center_and_store<M, P>(
    matrix: &M,
    path: P,
    policy: LayoutPolicy,
    delimiter: char,
) -> PlsResult<StoredCenteredMatrix>
where
    M: RawMatrix + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let (nrows, ncols) = matrix.shape();
    let layout = policy.choose(nrows, ncols);
    let start_time = Instant::now();

    let column_means = matrix.column_means();

    let file = File::create(path).map_err(|e| PlsError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut float_buffer = ryu::Buffer::new();
    let mut delimiter_buf = [0u8; 4];
    let delimiter_bytes: &[u8] = delimiter.encode_utf8(&mut delimiter_buf).as_bytes();
    let mut sum_of_squares = 0.0f64;

    let num_lines = layout.num_lines(nrows, ncols);
    for line_idx in 0..num_lines {
        let centered_line = match layout {
            StorageLayout::RowPerLine => matrix.row(line_idx) - &column_means,
            StorageLayout::ColumnPerLine => matrix.column(line_idx) - column_means[line_idx],
        };
        for (k, value) in centered_line.iter().enumerate() {
            if k > 0 {
                writer.write_all(delimiter_bytes).map_err(|e| PlsError::io(path, e))?;
            }
            writer
                .write_all(float_buffer.format(*value).as_bytes())
                .map_err(|e| PlsError::io(path, e))?;
            sum_of_squares += value * value;
        }
        writer.write_all(b"\n").map_err(|e| PlsError::io(path, e))?;
    }
    writer.flush().map_err(|e| PlsError::io(path, e))?;

    info!(
        "Centered and stored a {}x{} matrix as {:?} ({} lines) at {:?} in {:?}",
        nrows,
        ncols,
        layout,
        num_lines,
        path,
        start_time.elapsed()
    );

    Ok(StoredCenteredMatrix {
        path: path.to_path_buf(),
        nrows,
        ncols,
        layout,
        delimiter,
        column_means: Some(column_means),
        sum_of_squares,
    })
}

impl StoredCenteredMatrix {
    /// Reopens a file written by [`center_and_store`].
    ///
    /// The line count is taken with [`count_lines`]; one streaming pass then
    /// validates every line and accumulates the total sum of squares.
    /// Column means are not recoverable from the file and are `None`.
    pub fn open<P: AsRef<Path>>(path: P, layout: StorageLayout, delimiter: char) -> PlsResult<Self> {
        let path = path.as_ref();
        let num_lines = count_lines(path)?;

        let mut line_len: Option<usize> = None;
        let mut sum_of_squares = 0.0f64;
        for_each_line(path, delimiter, num_lines, None, |_, values| {
            match line_len {
                None => line_len = Some(values.len()),
                Some(expected) if expected != values.len() => {
                    return Err(format!("expected {} values, found {}", expected, values.len()));
                }
                Some(_) => {}
            }
            sum_of_squares += values.iter().map(|v| v * v).sum::<f64>();
            Ok(())
        })?;
        let line_len = line_len.unwrap_or(0);

        let (nrows, ncols) = match layout {
            StorageLayout::RowPerLine => (num_lines, line_len),
            StorageLayout::ColumnPerLine => (line_len, num_lines),
        };
        debug!("Opened stored centered matrix {:?}: {}x{} as {:?}", path, nrows, ncols, layout);

        Ok(Self {
            path: path.to_path_buf(),
            nrows,
            ncols,
            layout,
            delimiter,
            column_means: None,
            sum_of_squares,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Means that were subtracted, when this handle came from [`center_and_store`].
    pub fn column_means(&self) -> Option<&Array1<f64>> {
        self.column_means.as_ref()
    }

    /// Σ of the squared centered values, accumulated while the file was written or opened.
    pub fn sum_of_squares(&self) -> f64 {
        self.sum_of_squares
    }

    fn num_lines(&self) -> usize {
        self.layout.num_lines(self.nrows, self.ncols)
    }

    fn line_len(&self) -> usize {
        match self.layout {
            StorageLayout::RowPerLine => self.ncols,
            StorageLayout::ColumnPerLine => self.nrows,
        }
    }

    /// `X · b` for `b` of shape (ncols × c), streamed from disk.
    pub fn dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        self.stream_product(b, false)
    }

    /// `Xᵗ · b` for `b` of shape (nrows × c), streamed from disk.
    pub fn t_dot(&self, b: ArrayView2<f64>) -> PlsResult<Array2<f64>> {
        self.stream_product(b, true)
    }

    /// Computes `op(X) · b`, where `op` is the transpose when `transpose_x` is set.
    ///
    /// The lines of the file form a matrix `L` (`L = X` for row-per-line,
    /// `L = Xᵗ` for column-per-line). When the requested product is `L · b`,
    /// every line yields one finished result row. When it is `Lᵗ · b`, every
    /// line `i` adds the rank-one term `L[i,:]ᵗ ⊗ b[i,:]` to the result.
    fn stream_product(&self, b: ArrayView2<f64>, transpose_x: bool) -> PlsResult<Array2<f64>> {
        let lines_are_product_rows = self.layout.is_by_row() != transpose_x;
        let num_lines = self.num_lines();
        let line_len = self.line_len();
        let expected_b_rows = if lines_are_product_rows { line_len } else { num_lines };
        if b.nrows() != expected_b_rows {
            return Err(PlsError::InvalidInput(format!(
                "Cannot multiply stored matrix {:?} ({}x{}, {}transposed) with a {}x{} operand.",
                self.path,
                self.nrows,
                self.ncols,
                if transpose_x { "" } else { "not " },
                b.nrows(),
                b.ncols()
            )));
        }

        let start_time = Instant::now();
        let result = if lines_are_product_rows {
            dot_product(&self.path, num_lines, b, self.delimiter)?
        } else {
            let mut accumulated = Array2::<f64>::zeros((line_len, b.ncols()));
            for_each_line(&self.path, self.delimiter, num_lines, Some(line_len), |line_idx, values| {
                let b_row = b.row(line_idx);
                for (k, &value) in values.iter().enumerate() {
                    if value != 0.0 {
                        accumulated.row_mut(k).scaled_add(value, &b_row);
                    }
                }
                Ok(())
            })?;
            accumulated
        };
        trace!(
            "Streamed {} product from {:?} ({} lines, {} operand columns) in {:?}",
            if transpose_x { "X^T.B" } else { "X.B" },
            self.path,
            num_lines,
            b.ncols(),
            start_time.elapsed()
        );
        Ok(result)
    }

    /// Reads the whole stored matrix back into memory as the logical X.
    ///
    /// Only meant for small matrices and verification; it defeats the purpose
    /// of out-of-core storage for large ones.
    pub fn load_dense(&self) -> PlsResult<Array2<f64>> {
        let mut dense = Array2::<f64>::zeros((self.nrows, self.ncols));
        let layout = self.layout;
        for_each_line(&self.path, self.delimiter, self.num_lines(), Some(self.line_len()), |line_idx, values| {
            let line = ArrayView1::from(values);
            match layout {
                StorageLayout::RowPerLine => dense.row_mut(line_idx).assign(&line),
                StorageLayout::ColumnPerLine => dense.column_mut(line_idx).assign(&line),
            }
            Ok(())
        })?;
        Ok(dense)
    }
}

// --- Streaming dot product ---

/// Computes `stored · y` where `stored` is the matrix in `path` read with one
/// row per line and `num_rows` rows.
///
/// To get `Xᵗ · y` for a matrix X, pass the location of X's transpose (a
/// column-per-line file). Each line is parsed, multiplied with `y` and
/// discarded; only one line and the (num_rows × y.ncols()) result are ever in
/// memory. The result is assumed to fit in memory.
pub fn dot_product<P: AsRef<Path>>(
    path: P,
    num_rows: usize,
    y: ArrayView2<f64>,
    delimiter: char,
) -> PlsResult<Array2<f64>> {
    let path = path.as_ref();
    let mut result = Array2::<f64>::zeros((num_rows, y.ncols()));
    for_each_line(path, delimiter, num_rows, Some(y.nrows()), |line_idx, values| {
        let row = ArrayView1::from(values);
        result.row_mut(line_idx).assign(&row.dot(&y));
        Ok(())
    })?;
    Ok(result)
}

/// [`dot_product`] for a single response column; the result is a vector.
pub fn dot_product_column<P: AsRef<Path>>(
    path: P,
    num_rows: usize,
    y: ArrayView1<f64>,
    delimiter: char,
) -> PlsResult<Array1<f64>> {
    let as_matrix = y.insert_axis(Axis(1));
    let product = dot_product(path, num_rows, as_matrix, delimiter)?;
    Ok(product.index_axis_move(Axis(1), 0))
}

/// Streams `path` line by line, parsing each line into `f64`s and handing the
/// values to `visit` together with the line index.
///
/// The file must contain exactly `expected_lines` lines. When `expected_len`
/// is given every line must hold exactly that many values. `visit` reports a
/// problem with the current line by returning `Err(message)`.
fn for_each_line<F>(
    path: &Path,
    delimiter: char,
    expected_lines: usize,
    expected_len: Option<usize>,
    mut visit: F,
) -> PlsResult<()>
where
    F: FnMut(usize, &[f64]) -> Result<(), String>,
{
    let file = File::open(path).map_err(|e| PlsError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut values: Vec<f64> = Vec::with_capacity(expected_len.unwrap_or(0));
    let mut line_idx = 0usize;

    let parse_error = |line: usize, message: String| PlsError::Parse {
        path: path.to_path_buf(),
        line: line + 1,
        message,
    };

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).map_err(|e| PlsError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        if line_idx >= expected_lines {
            return Err(parse_error(
                line_idx,
                format!("file has more than the expected {} lines", expected_lines),
            ));
        }

        values.clear();
        let content = line.trim_end_matches(&['\n', '\r'][..]);
        if !content.is_empty() {
            for token in content.split(delimiter) {
                let value = token
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| parse_error(line_idx, format!("cannot parse '{}' as a number: {}", token, e)))?;
                values.push(value);
            }
        }
        if let Some(expected) = expected_len {
            if values.len() != expected {
                return Err(parse_error(
                    line_idx,
                    format!("expected {} values, found {}", expected, values.len()),
                ));
            }
        }

        visit(line_idx, &values).map_err(|message| parse_error(line_idx, message))?;
        line_idx += 1;
    }

    if line_idx != expected_lines {
        return Err(parse_error(
            line_idx.saturating_sub(1),
            format!("expected {} lines, found {}", expected_lines, line_idx),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use tempfile::tempdir;

    fn centered(matrix: &Array2<f64>) -> Array2<f64> {
        let means = matrix.mean_axis(Axis(0)).unwrap();
        matrix - &means
    }

    #[test]
    fn policy_minimizes_line_count() {
        assert_eq!(LayoutPolicy::MinimizeLines.choose(4, 3), StorageLayout::ColumnPerLine);
        assert_eq!(LayoutPolicy::MinimizeLines.choose(3, 4), StorageLayout::RowPerLine);
        assert_eq!(LayoutPolicy::MinimizeLines.choose(5, 5), StorageLayout::RowPerLine);
        assert_eq!(LayoutPolicy::RowPerLine.choose(100, 2), StorageLayout::RowPerLine);
        assert_eq!(LayoutPolicy::ColumnPerLine.choose(2, 100), StorageLayout::ColumnPerLine);
    }

    #[test]
    fn count_lines_counts_newlines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.txt");
        std::fs::write(&path, "a\tb\n1\t2\n\n3\t4\n").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 4);

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "").unwrap();
        assert_eq!(count_lines(&empty).unwrap(), 0);
    }

    #[test]
    fn count_lines_spans_multiple_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let line = "x".repeat(999) + "\n";
        let body = line.repeat(3000); // ~3 MB, several read chunks
        std::fs::write(&path, body).unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3000);
    }

    #[test]
    fn count_lines_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = count_lines(dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, PlsError::Io { .. }));
    }

    #[test]
    fn tall_matrix_is_stored_by_column_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tall.tsv");
        let x = array![[4.0, 2.0, 10.0], [1.0, 5.0, 12.0], [7.0, 11.0, 9.0], [3.0, 6.0, 8.0]];
        let stored = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap();

        assert_eq!(stored.layout(), StorageLayout::ColumnPerLine);
        assert!(!stored.layout().is_by_row());
        assert_eq!(count_lines(&path).unwrap(), 3);
        assert_eq!((stored.nrows(), stored.ncols()), (4, 3));

        let expected = centered(&x);
        assert_eq!(stored.load_dense().unwrap(), expected);
        assert_abs_diff_eq!(stored.sum_of_squares(), expected.mapv(|v| v * v).sum(), epsilon = 1e-12);
    }

    #[test]
    fn wide_matrix_is_stored_by_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.tsv");
        let x = array![
            [4.0, 2.0, 17.0, 10.0, 13.0],
            [16.0, 1.0, 5.0, 18.0, 12.0],
            [7.0, 11.0, 19.0, 9.0, 14.0],
            [15.0, 20.0, 3.0, 6.0, 8.0]
        ];
        let stored = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap();
        assert_eq!(stored.layout(), StorageLayout::RowPerLine);
        assert_eq!(count_lines(&path).unwrap(), 4);
        assert_eq!(stored.load_dense().unwrap(), centered(&x));

        let text = std::fs::read_to_string(&path).unwrap();
        let first_line = text.lines().next().unwrap();
        assert_eq!(first_line.split('\t').count(), 5);
    }

    #[test]
    fn custom_delimiter_is_respected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comma.csv");
        let x = array![[1.0, 2.0], [3.0, 5.0], [0.5, -1.0]];
        let stored = center_and_store(&x, &path, LayoutPolicy::RowPerLine, ',').unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().all(|l| l.split(',').count() == 2));

        let reopened = StoredCenteredMatrix::open(&path, StorageLayout::RowPerLine, ',').unwrap();
        assert_eq!((reopened.nrows(), reopened.ncols()), (3, 2));
        assert!(reopened.column_means().is_none());
        assert_abs_diff_eq!(reopened.sum_of_squares(), stored.sum_of_squares(), epsilon = 1e-12);
    }

    #[test]
    fn dot_and_t_dot_agree_with_memory_for_both_layouts() {
        let dir = tempdir().unwrap();
        let x = array![[4.0, 2.0, 3.0], [1.0, 5.0, 8.0], [7.0, 6.0, 9.0], [0.0, 1.0, 2.5]];
        let xc = centered(&x);
        let b_cols = array![[1.0, -1.0], [0.5, 2.0], [3.0, 0.0]];
        let b_rows = array![[1.0], [2.0], [-1.0], [0.25]];

        for policy in [LayoutPolicy::RowPerLine, LayoutPolicy::ColumnPerLine] {
            let path = dir.path().join(format!("{:?}.tsv", policy));
            let stored = center_and_store(&x, &path, policy, DEFAULT_DELIMITER).unwrap();

            let xb = stored.dot(b_cols.view()).unwrap();
            let expected_xb = xc.dot(&b_cols);
            for (a, e) in xb.iter().zip(expected_xb.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = 1e-10);
            }

            let xtb = stored.t_dot(b_rows.view()).unwrap();
            let expected_xtb = xc.t().dot(&b_rows);
            assert_eq!(xtb.dim(), (3, 1));
            for (a, e) in xtb.iter().zip(expected_xtb.iter()) {
                assert_abs_diff_eq!(*a, *e, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn operand_shape_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.tsv");
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 7.0]];
        let stored = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap();
        let wrong = Array2::<f64>::ones((5, 1));
        assert!(matches!(stored.dot(wrong.view()), Err(PlsError::InvalidInput(_))));
        assert!(matches!(stored.t_dot(wrong.view()), Err(PlsError::InvalidInput(_))));
    }

    #[test]
    fn dot_product_column_treats_vector_as_width_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rows.tsv");
        std::fs::write(&path, "1\t2\n3\t4\n-1\t0.5\n").unwrap();
        let y = array![2.0, -1.0];
        let product = dot_product_column(&path, 3, y.view(), '\t').unwrap();
        assert_eq!(product, array![0.0, 2.0, -2.5]);
    }

    #[test]
    fn malformed_files_report_the_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "1\t2\n3\tabc\n").unwrap();
        let y = Array2::<f64>::ones((2, 1));
        match dot_product(&path, 2, y.view(), '\t') {
            Err(PlsError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }

        std::fs::write(&path, "1\t2\n3\t4\n").unwrap();
        assert!(matches!(dot_product(&path, 3, y.view(), '\t'), Err(PlsError::Parse { .. })));
        assert!(matches!(dot_product(&path, 1, y.view(), '\t'), Err(PlsError::Parse { .. })));

        std::fs::write(&path, "1\t2\n3\n").unwrap();
        assert!(matches!(dot_product(&path, 2, y.view(), '\t'), Err(PlsError::Parse { .. })));
    }

    #[test]
    fn row_subset_centers_only_selected_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("subset.tsv");
        let x = array![[1.0, 10.0], [2.0, 20.0], [4.0, 40.0], [8.0, 80.0]];
        let rows = [3usize, 0, 2];
        let subset = RowSubset::new(&x, &rows);
        assert_eq!(subset.shape(), (3, 2));
        assert_eq!(subset.column(1), array![80.0, 10.0, 40.0]);

        let stored = center_and_store(&subset, &path, LayoutPolicy::ColumnPerLine, DEFAULT_DELIMITER).unwrap();
        let selected = array![[8.0, 80.0], [1.0, 10.0], [4.0, 40.0]];
        assert_eq!(stored.column_means().unwrap(), &array![13.0 / 3.0, 130.0 / 3.0]);
        let dense = stored.load_dense().unwrap();
        let expected = centered(&selected);
        for (a, e) in dense.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn writing_into_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("x.tsv");
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let err = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap_err();
        assert!(matches!(err, PlsError::Io { .. }));
    }
}
