//! CPU load generator.
//!
//! Wastes a target share of CPU time per thread by duty cycling: each
//! 100 ms control cycle busy-spins for `load%` of the cycle, then sleeps
//! the remainder.

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

const CYCLE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "loadgen", about = "Generate sustained CPU load")]
struct Cli {
    /// Target CPU load percentage per thread (0-100)
    load_percent: u32,
    /// Worker thread count (defaults to the number of CPUs)
    threads: Option<usize>,
}

fn worker(load: u32) {
    let busy = CYCLE.mul_f64(load as f64 / 100.0);
    let idle = CYCLE - busy;

    loop {
        let start = Instant::now();
        while start.elapsed() < busy {
            std::hint::spin_loop();
        }
        if !idle.is_zero() {
            thread::sleep(idle);
        }
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

    if cli.load_percent > 100 {
        eprintln!("Load must be between 0 and 100.");
        std::process::exit(1);
    }

    let threads = cli.threads.unwrap_or_else(|| {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    });

    println!(
        "Starting {} threads targeting ~{}% CPU load per thread.",
        threads, cli.load_percent
    );

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let load = cli.load_percent;
            thread::spawn(move || worker(load))
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}
