//! Classifier postprocessor CLI.
//!
//! Reads one raw float32 logits file, resolves the argmax against a
//! labels file and prints a single machine-parseable line:
//! `<max_value> <max_idx> <label>`.

use clap::Parser;

use edgeswarm_core::vision::postprocess::{argmax, label_at, read_logits};

#[derive(Parser)]
#[command(name = "postprocess", about = "Resolve classifier logits to a label")]
struct Cli {
    /// Raw float32 logits file
    raw_file: String,
    /// Labels file, one label per line (0-indexed)
    labels_file: String,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(2);
        }
    };

    let logits = match read_logits(&cli.raw_file) {
        Ok(logits) => logits,
        Err(e) => {
            eprintln!("ERR: cannot open raw file: {}", e);
            std::process::exit(3);
        }
    };

    let Some((idx, val)) = argmax(&logits) else {
        eprintln!("ERR: raw file has no floats");
        std::process::exit(4);
    };

    println!("{} {} {}", val, idx, label_at(&cli.labels_file, idx));
}
