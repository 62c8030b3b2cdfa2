//! Image preprocessing for the classification pipeline.
//!
//! Center-square-crop, resize to the model's input edge, then a raw
//! float32 tensor in BGR channel order normalized as `(v - 128) / 128`.
//! The resized jpg is kept beside the tensor for inspection. Each run
//! clears and rewrites the target list consumed by the inference step.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{Result, SwarmError};

/// Per-channel mean subtracted before scaling.
const MEAN: f32 = 128.0;
/// Divisor applied after mean subtraction.
const DIVISOR: f32 = 128.0;

/// File name of the list consumed by the inference step.
pub const TARGET_LIST: &str = "target_raw_list.txt";

/// Supported resize methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeKind {
    Bilinear,
    Antialias,
}

impl ResizeKind {
    fn filter(self) -> FilterType {
        match self {
            Self::Bilinear => FilterType::Triangle,
            Self::Antialias => FilterType::Lanczos3,
        }
    }
}

impl FromStr for ResizeKind {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bilinear" => Ok(Self::Bilinear),
            "antialias" => Ok(Self::Antialias),
            other => Err(SwarmError::configuration(format!(
                "resize_type must be 'bilinear' or 'antialias', got '{}'",
                other
            ))),
        }
    }
}

/// Crop the largest centered square.
fn center_crop_square(img: &DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    let short = width.min(height);
    let x = (width - short) / 2;
    let y = (height - short) / 2;
    img.crop_imm(x, y, short, short)
}

/// Serialize an image as a raw BGR float32 tensor.
fn to_raw_tensor(img: &DynamicImage) -> Vec<u8> {
    let rgb = img.to_rgb8();
    let mut out = Vec::with_capacity((rgb.width() * rgb.height() * 3 * 4) as usize);
    for pixel in rgb.pixels() {
        let [r, g, b] = pixel.0;
        for channel in [b, g, r] {
            let v = (channel as f32 - MEAN) / DIVISOR;
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

/// Process one image: crop, resize, save the jpg and its raw tensor.
///
/// Returns the raw tensor path.
pub fn process_image(
    src: &Path,
    dest_jpg: &Path,
    size: u32,
    resize: ResizeKind,
) -> Result<PathBuf> {
    let img = image::open(src).map_err(|e| {
        SwarmError::with_internal(
            crate::error::ErrorCode::FileReadFailed,
            format!("Cannot read image {}", src.display()),
            e.to_string(),
        )
    })?;

    let cropped = center_crop_square(&img);
    let resized = cropped.resize_exact(size, size, resize.filter());

    resized.save(dest_jpg).map_err(|e| {
        SwarmError::with_internal(
            crate::error::ErrorCode::FileWriteFailed,
            format!("Cannot write {}", dest_jpg.display()),
            e.to_string(),
        )
    })?;

    let raw_path = dest_jpg.with_extension("raw");
    fs::write(&raw_path, to_raw_tensor(&resized))?;
    Ok(raw_path)
}

fn is_jpeg(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jpg") | Some("jpeg") | Some("JPG") | Some("JPEG")
    )
}

fn collect_jpegs(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_jpegs(&path, out)?;
        } else if is_jpeg(&path) {
            out.push(path);
        }
    }
    Ok(())
}

/// Process every jpeg under `src_dir` into `dest_dir`, rewriting the
/// target list (one `<dest_dir_name>/<name>.raw` line per image).
///
/// Returns the number of images processed.
pub fn process_dir(
    src_dir: &Path,
    dest_dir: &Path,
    size: u32,
    resize: ResizeKind,
    list_path: &Path,
) -> Result<usize> {
    fs::create_dir_all(dest_dir)?;

    let mut sources = Vec::new();
    collect_jpegs(src_dir, &mut sources)?;
    sources.sort();

    let dest_prefix = dest_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("cropped");

    let mut list = String::new();
    let mut processed = 0usize;
    for src in &sources {
        let file_name = match src.file_name() {
            Some(n) => n,
            None => continue,
        };
        let dest_jpg = dest_dir.join(file_name);
        match process_image(src, &dest_jpg, size, resize) {
            Ok(raw_path) => {
                if let Some(raw_name) = raw_path.file_name().and_then(|n| n.to_str()) {
                    let _ = writeln!(list, "{}/{}", dest_prefix, raw_name);
                }
                processed += 1;
            }
            Err(e) => {
                tracing::warn!(src = %src.display(), error = %e, "Skipping image");
            }
        }
    }

    // Cleared before each run: the list always reflects exactly this batch.
    fs::write(list_path, list)?;
    Ok(processed)
}
