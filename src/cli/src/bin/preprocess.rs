//! Image preprocessor CLI.
//!
//! Converts every jpeg under the source directory into resized jpgs and
//! raw BGR float32 tensors under the destination directory, rewriting
//! `target_raw_list.txt` for the inference step.

use std::path::Path;

use clap::Parser;

use edgeswarm_core::vision::preprocess::{process_dir, ResizeKind, TARGET_LIST};

#[derive(Parser)]
#[command(name = "preprocess", about = "Prepare images for the classifier")]
struct Cli {
    /// Directory scanned recursively for jpeg images
    src_dir: String,
    /// Destination for resized jpgs and raw tensors
    dest_dir: String,
    /// Model input edge length
    size: u32,
    /// Resize method: bilinear or antialias
    resize_type: String,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    let resize: ResizeKind = match cli.resize_type.parse() {
        Ok(r) => r,
        Err(_) => {
            eprintln!("resize_type must be 'bilinear' or 'antialias'");
            std::process::exit(2);
        }
    };

    println!("Converting images for the classifier network.");
    match process_dir(
        Path::new(&cli.src_dir),
        Path::new(&cli.dest_dir),
        cli.size,
        resize,
        Path::new(TARGET_LIST),
    ) {
        Ok(count) => println!("Processed {} image(s).", count),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
