//! RAM load generator.
//!
//! Allocates the requested number of megabytes split across threads and
//! keeps every 4 KiB page resident by touching it in a sweep loop.

use std::thread;
use std::time::Duration;

use clap::Parser;

const PAGE: usize = 4096;
const SWEEP_PAUSE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "ramload", about = "Generate sustained memory pressure")]
struct Cli {
    /// Megabytes to allocate in total
    megabytes: usize,
    /// Worker thread count
    #[arg(default_value_t = 1)]
    threads: usize,
}

fn ram_stress(mb: usize) {
    let bytes = mb * 1024 * 1024;
    let mut buffer = vec![0u8; bytes];

    println!("Allocated {} MB, starting memory write loop...", mb);

    loop {
        let mut i = 0;
        while i < bytes {
            buffer[i] = (i % 256) as u8;
            i += PAGE;
        }
        thread::sleep(SWEEP_PAUSE);
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    if cli.threads == 0 {
        eprintln!("Thread count must be at least 1.");
        std::process::exit(1);
    }

    println!(
        "Simulating ~{} MB memory load using {} thread(s)",
        cli.megabytes, cli.threads
    );

    let per_thread = cli.megabytes / cli.threads;
    let handles: Vec<_> = (0..cli.threads)
        .map(|_| thread::spawn(move || ram_stress(per_thread)))
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}
