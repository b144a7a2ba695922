//! Embedding matrices on disk as NumPy `.npy` files
//!
//! Each view's normalized `len x dim` matrix is stored as `<f4`, C order,
//! readable with `numpy.load`.

use anyhow::{Context, Result};
use fs2::FileExt;
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Write a matrix to disk under an exclusive lock
pub fn write_npy(path: &Path, matrix: &Array2<f32>) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create embeddings file: {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("Failed to acquire exclusive lock on: {}", path.display()))?;

    let mut writer = BufWriter::new(&file);
    matrix
        .write_npy(&mut writer)
        .with_context(|| format!("Failed to write embeddings: {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush embeddings: {}", path.display()))?;
    Ok(())
}

/// Read a matrix from disk under a shared lock
pub fn read_npy(path: &Path) -> Result<Array2<f32>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open embeddings file: {}", path.display()))?;
    file.lock_shared()
        .with_context(|| format!("Failed to acquire shared lock on: {}", path.display()))?;

    Array2::<f32>::read_npy(BufReader::new(&file))
        .with_context(|| format!("Invalid embeddings file: {}", path.display()))
}
