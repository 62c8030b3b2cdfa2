//! Image classification pipeline.
//!
//! Received images land in a timestamped scratch path, get copied into
//! the bundle's `images/` directory, then flow through preprocess →
//! external inference → postprocess. The neural-network runner itself is
//! an external collaborator invoked over a filesystem contract.

pub mod postprocess;
pub mod preprocess;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::VisionConfig;
use crate::error::{ErrorCode, Result, SwarmError};

pub use preprocess::{ResizeKind, TARGET_LIST};

/// Orchestrates the §classify filesystem contract for one worker.
pub struct ClassifyPipeline {
    config: VisionConfig,
}

impl ClassifyPipeline {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }

    /// Write received image bytes to a timestamped scratch path and copy
    /// them into the bundle's `images/` directory.
    pub fn receive_image(&self, bytes: &[u8]) -> Result<PathBuf> {
        let scratch = Path::new(&self.config.scratch_dir);
        fs::create_dir_all(scratch)?;

        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let scratch_path = scratch.join(format!("received-{}.jpg", stamp));
        fs::write(&scratch_path, bytes)?;

        let images_dir = Path::new(&self.config.bundle_dir).join("images");
        fs::create_dir_all(&images_dir)?;
        let bundle_path = images_dir.join(
            scratch_path
                .file_name()
                .ok_or_else(|| SwarmError::internal("scratch path has no file name"))?,
        );
        fs::copy(&scratch_path, &bundle_path)?;

        tracing::debug!(path = %bundle_path.display(), "Image staged for classification");
        Ok(bundle_path)
    }

    /// Run the whole pipeline over one received image and return the
    /// classification line.
    pub fn classify(&self, image_bytes: &[u8]) -> Result<String> {
        self.receive_image(image_bytes)?;

        let bundle = Path::new(&self.config.bundle_dir);
        let images_dir = bundle.join("images");
        let cropped_dir = bundle.join("cropped");
        let list_path = bundle.join(TARGET_LIST);

        let resize: ResizeKind = self.config.resize_type.parse()?;
        let processed = preprocess::process_dir(
            &images_dir,
            &cropped_dir,
            self.config.input_size,
            resize,
            &list_path,
        )?;
        if processed == 0 {
            return Err(SwarmError::bundle_missing(images_dir.display()));
        }

        let output_dir = bundle.join("output");
        self.run_inference(bundle, &output_dir)?;

        let logits = newest_result_raw(&output_dir)?;
        postprocess::classify_line(&logits, &self.config.labels_file)
    }

    /// Invoke the external inference runner over the target list.
    fn run_inference(&self, bundle: &Path, output_dir: &Path) -> Result<()> {
        let Some(command) = &self.config.infer_command else {
            // No model on this device: classification degrades to an error
            // result while the worker stays registered.
            return Err(SwarmError::runner_failed("no inference command configured"));
        };

        fs::create_dir_all(output_dir)?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(bundle)
            .output()
            .map_err(|e| SwarmError::runner_failed(e.to_string()))?;

        if !output.status.success() {
            return Err(SwarmError::runner_failed(format!(
                "inference exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// Find the most recently modified raw logits file under the `Result_*`
/// directories the inference runner produces.
fn newest_result_raw(output_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_result_dir = path.is_dir()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("Result_"));
        if is_result_dir {
            collect_raw_files(&path, &mut candidates)?;
        }
    }

    candidates
        .into_iter()
        .max_by_key(|p| {
            fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        })
        .ok_or_else(|| {
            SwarmError::new(
                ErrorCode::BundleMissing,
                format!("No logits produced under {}", output_dir.display()),
            )
        })
}

fn collect_raw_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_raw_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("raw") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> VisionConfig {
        VisionConfig {
            scratch_dir: dir.join("scratch").to_string_lossy().into_owned(),
            bundle_dir: dir.join("bundle").to_string_lossy().into_owned(),
            labels_file: dir.join("labels.txt").to_string_lossy().into_owned(),
            input_size: 8,
            resize_type: "bilinear".to_string(),
            infer_command: None,
        }
    }

    fn jpeg_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([90, 120, 200]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Jpeg).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_receive_image_stages_into_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ClassifyPipeline::new(test_config(dir.path()));

        let staged = pipeline.receive_image(&jpeg_bytes()).unwrap();
        assert!(staged.exists());
        assert!(staged.starts_with(dir.path().join("bundle").join("images")));

        // The scratch copy also survives.
        let scratch_entries: Vec<_> = fs::read_dir(dir.path().join("scratch"))
            .unwrap()
            .collect();
        assert_eq!(scratch_entries.len(), 1);
    }

    #[test]
    fn test_classify_without_model_is_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ClassifyPipeline::new(test_config(dir.path()));

        let err = pipeline.classify(&jpeg_bytes()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RunnerFailed);
    }

    #[test]
    fn test_classify_with_fake_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        fs::write(dir.path().join("labels.txt"), "cat\ndog\nfish\nbird").unwrap();

        // Fake inference: write known logits (LE f32 [0.1, 0.9, 0.2, 0.8],
        // octal escapes for POSIX printf) where the runner would.
        let logits_script = r#"
            mkdir -p output/Result_0
            printf '\315\314\314\075\146\146\146\077\315\314\114\076\315\314\114\077' \
                > "output/Result_0/InceptionV3_Predictions_0.raw"
        "#;
        config.infer_command = Some(logits_script.to_string());

        let pipeline = ClassifyPipeline::new(config);
        let line = pipeline.classify(&jpeg_bytes()).unwrap();
        // [0.1, 0.9, 0.2, 0.8] -> dog
        assert_eq!(line, "0.9 1 dog");
    }

    #[test]
    fn test_newest_result_raw_requires_result_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("other")).unwrap();
        assert!(newest_result_raw(dir.path()).is_err());
    }
}
