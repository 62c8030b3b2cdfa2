//! LinUCB solver CLI.
//!
//! Maintains the single-objective latency model persisted as plain-text
//! `A`/`b` files. `score` prints only the score so shell callers can
//! capture it directly.

use clap::{Parser, Subcommand};

use edgeswarm_core::bandit::{features, LatencyModel, DEFAULT_ALPHA, DIM};

#[derive(Parser)]
#[command(
    name = "linucb",
    about = "Ridge-regression + LCB latency model for edge devices",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize solver state with the identity matrix
    Init {
        a_file: String,
        b_file: String,
        #[arg(default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },
    /// Load solver state and display it
    Load {
        a_file: String,
        b_file: String,
        #[arg(default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },
    /// Score a feature vector (cpu 0-100, ram 0-100, prompt length)
    Score {
        a_file: String,
        b_file: String,
        cpu: f64,
        ram: f64,
        prompt_len: f64,
        #[arg(default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },
    /// Train the model with an observed latency
    Train {
        a_file: String,
        b_file: String,
        cpu: f64,
        ram: f64,
        prompt_len: f64,
        latency: f64,
        #[arg(default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },
    /// Print solver state
    Print {
        a_file: String,
        b_file: String,
        #[arg(default_value_t = DEFAULT_ALPHA)]
        alpha: f64,
    },
}

fn print_state(model: &LatencyModel) {
    println!("LinUCB solver state (alpha={:.2}):", model.alpha);
    println!("Matrix A:");
    for row in model.a.iter() {
        print!("  ");
        for v in row.iter() {
            print!("{:.4} ", v);
        }
        println!();
    }
    println!("Vector b:");
    print!("  ");
    for i in 0..DIM {
        print!("{:.4} ", model.b[i]);
    }
    println!();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init {
            a_file,
            b_file,
            alpha,
        } => {
            let model = LatencyModel::cold(alpha);
            model.save(&a_file, &b_file)?;
            println!(
                "Initialized solver with identity matrix and saved to {}, {}",
                a_file, b_file
            );
        }
        Commands::Load {
            a_file,
            b_file,
            alpha,
        } => {
            let model = LatencyModel::load(&a_file, &b_file, alpha);
            println!("Loaded solver from {}, {}", a_file, b_file);
            print_state(&model);
        }
        Commands::Score {
            a_file,
            b_file,
            cpu,
            ram,
            prompt_len,
            alpha,
        } => {
            let model = LatencyModel::load(&a_file, &b_file, alpha);
            let score = model.score(&features(cpu, ram, prompt_len));
            println!("{:.6}", score);
        }
        Commands::Train {
            a_file,
            b_file,
            cpu,
            ram,
            prompt_len,
            latency,
            alpha,
        } => {
            let mut model = LatencyModel::load(&a_file, &b_file, alpha);
            model.train(&features(cpu, ram, prompt_len), latency);
            model.save(&a_file, &b_file)?;
            println!(
                "Trained model with latency={:.6} and saved to {}, {}",
                latency, a_file, b_file
            );
        }
        Commands::Print {
            a_file,
            b_file,
            alpha,
        } => {
            let model = LatencyModel::load(&a_file, &b_file, alpha);
            print_state(&model);
        }
    }
    Ok(())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage failures exit 1, matching the other device tools.
            eprint!("{}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
