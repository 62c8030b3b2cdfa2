//! Postprocessing of raw classifier logits.
//!
//! Reads one raw float32 vector, finds the argmax and resolves it
//! against a labels file (one label per line, 0-indexed).

use std::fs;
use std::path::Path;

use crate::error::{ErrorCode, Result, SwarmError};

/// Read a little-endian float32 vector from a raw file.
pub fn read_logits(path: impl AsRef<Path>) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| {
        SwarmError::with_internal(
            ErrorCode::FileReadFailed,
            format!("Cannot open raw file {}", path.display()),
            e.to_string(),
        )
    })?;

    // Trailing bytes short of a full float are ignored.
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Index and value of the largest logit.
pub fn argmax(logits: &[f32]) -> Option<(usize, f32)> {
    let mut best = (0usize, *logits.first()?);
    for (i, &v) in logits.iter().enumerate().skip(1) {
        if v > best.1 {
            best = (i, v);
        }
    }
    Some(best)
}

/// The `index`-th line of the labels file, `unknown` when out of range or
/// the file is unreadable.
pub fn label_at(labels_path: impl AsRef<Path>, index: usize) -> String {
    match fs::read_to_string(labels_path) {
        Ok(text) => text
            .lines()
            .nth(index)
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string()),
        Err(_) => "unknown".to_string(),
    }
}

/// Produce the classification line `<max_value> <max_idx> <label>`.
pub fn classify_line(raw_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result<String> {
    let logits = read_logits(raw_path)?;
    let (idx, val) = argmax(&logits).ok_or_else(|| {
        SwarmError::new(ErrorCode::FileReadFailed, "Raw file holds no floats")
    })?;
    let label = label_at(labels_path, idx);
    Ok(format!("{} {} {}", val, idx, label))
}
