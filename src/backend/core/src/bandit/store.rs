//! Plain-text persistence for model state.
//!
//! The matrix file holds `DIM` lines of `DIM` space-separated decimal
//! floats; the vector file holds `DIM` lines of one float each. Writes go
//! to a sibling temp file and are renamed into place so a concurrent
//! reader never sees a half-written state.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::bandit::matrix::{Matrix, Vector, DIM};
use crate::error::{Result, SwarmError};

/// Load a matrix from its file.
pub fn load_matrix(path: impl AsRef<Path>) -> Result<Matrix> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| SwarmError::model_state(format!("{}: {}", path.display(), e)))?;
    parse_matrix(&text).ok_or_else(|| {
        SwarmError::model_state(format!("{}: expected {}x{} floats", path.display(), DIM, DIM))
    })
}

/// Load a vector from its file.
pub fn load_vector(path: impl AsRef<Path>) -> Result<Vector> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| SwarmError::model_state(format!("{}: {}", path.display(), e)))?;
    parse_vector(&text).ok_or_else(|| {
        SwarmError::model_state(format!("{}: expected {} floats", path.display(), DIM))
    })
}

/// Persist a matrix, atomically replacing the previous state.
pub fn save_matrix(path: impl AsRef<Path>, m: &Matrix) -> Result<()> {
    let mut out = String::new();
    for row in m.iter() {
        for v in row.iter() {
            let _ = write!(out, "{:.10} ", v);
        }
        out.push('\n');
    }
    atomic_write(path.as_ref(), &out)
}

/// Persist a vector, atomically replacing the previous state.
pub fn save_vector(path: impl AsRef<Path>, b: &Vector) -> Result<()> {
    let mut out = String::new();
    for v in b.iter() {
        let _ = writeln!(out, "{:.10}", v);
    }
    atomic_write(path.as_ref(), &out)
}

fn parse_matrix(text: &str) -> Option<Matrix> {
    let mut values = text.split_whitespace().map(str::parse::<f64>);
    let mut m = [[0.0; DIM]; DIM];
    for row in m.iter_mut() {
        for v in row.iter_mut() {
            *v = values.next()?.ok()?;
        }
    }
    Some(m)
}

fn parse_vector(text: &str) -> Option<Vector> {
    let mut values = text.split_whitespace().map(str::parse::<f64>);
    let mut b = [0.0; DIM];
    for v in b.iter_mut() {
        *v = values.next()?.ok()?;
    }
    Some(b)
}

fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .map_err(|e| SwarmError::model_state(format!("{}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| SwarmError::model_state(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::matrix::identity;

    #[test]
    fn test_matrix_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.txt");

        let mut m = identity();
        m[1][2] = 3.25;
        m[3][0] = -0.0625;

        save_matrix(&path, &m).unwrap();
        let loaded = load_matrix(&path).unwrap();
        assert_eq!(loaded, m);
    }

    #[test]
    fn test_vector_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");

        let b = [0.0, 1.5, -2.25, 1e6];
        save_vector(&path, &b).unwrap();
        assert_eq!(load_vector(&path).unwrap(), b);
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(load_matrix("/nonexistent/A.txt").is_err());
        assert!(load_vector("/nonexistent/b.txt").is_err());
    }

    #[test]
    fn test_truncated_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.txt");
        std::fs::write(&path, "1.0 2.0 3.0").unwrap();
        assert!(load_matrix(&path).is_err());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.txt");
        save_vector(&path, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(!dir.path().join("b.tmp").exists());
    }
}
