//! Matrix-Market read/write for real sparse matrices.

use super::sparse::SparseMatrix;
use crate::error::{LaError, LaResult};
use sprs::TriMat;
use std::path::Path;

/// Read a coordinate Matrix-Market file. Symmetric files are expanded.
pub fn read_matrix_market<P: AsRef<Path>>(path: P) -> LaResult<SparseMatrix<f64>> {
    let path = path.as_ref();
    let tri: TriMat<f64> = sprs::io::read_matrix_market(path)
        .map_err(|e| LaError::Io(format!("{}: {}", path.display(), e)))?;
    let (height, width) = tri.shape();
    log::debug!(
        "read {} x {} matrix with {} entries from {}",
        height,
        width,
        tri.nnz(),
        path.display()
    );
    SparseMatrix::from_triplets(
        height,
        width,
        tri.triplet_iter().map(|(&v, (i, j))| (i, j, v)),
    )
}

/// Write `a` as a general coordinate Matrix-Market file.
pub fn write_matrix_market<P: AsRef<Path>>(path: P, a: &SparseMatrix<f64>) -> LaResult<()> {
    let path = path.as_ref();
    let mut tri: TriMat<f64> = TriMat::with_capacity((a.height(), a.width()), a.num_entries());
    for (i, j, v) in a.triplets()? {
        tri.add_triplet(i, j, v);
    }
    sprs::io::write_matrix_market(path, &tri)
        .map_err(|e| LaError::Io(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let a = SparseMatrix::from_triplets(3, 2, vec![(0, 0, 1.5), (2, 1, -2.0), (1, 0, 4.0)]).unwrap();
        let path = std::env::temp_dir().join(format!("gridla_io_{}.mtx", std::process::id()));
        write_matrix_market(&path, &a).unwrap();
        let b = read_matrix_market(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(b.to_dense().unwrap(), a.to_dense().unwrap());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_matrix_market("/nonexistent/gridla.mtx").unwrap_err();
        assert!(matches!(err, LaError::Io(_)));
    }
}
