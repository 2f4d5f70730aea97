//! Offline verifier for a finished round
//!
//! Recomputes the crash point from the revealed seed and checks it against
//! the commitment published before the round started.

use aviator::games::{fairness::verify_round, types::Multiplier};
use clap::Parser;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "verify_round")]
#[command(about = "Verify an Aviator round from its revealed seed", long_about = None)]
struct Args {
    /// Revealed round seed (64 hex characters)
    #[arg(long)]
    seed: String,

    /// Seed hash published before the round
    #[arg(long)]
    seed_hash: Option<String>,

    /// House edge in basis points
    #[arg(long, default_value = "300")]
    house_edge_bps: u32,

    /// Crash point cap
    #[arg(long, default_value = "1000.0")]
    max_multiplier: f64,

    /// Crash point the operator reported, to compare against
    #[arg(long)]
    expected: Option<f64>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let Some(max_multiplier) = Multiplier::from_f64(args.max_multiplier) else {
        eprintln!("❌ Invalid --max-multiplier: {}", args.max_multiplier);
        return ExitCode::FAILURE;
    };

    println!("🔍 Aviator Round Verification");
    println!("=============================");

    let crash_point = match verify_round(
        &args.seed,
        args.seed_hash.as_deref(),
        args.house_edge_bps,
        max_multiplier,
    ) {
        Ok(crash_point) => crash_point,
        Err(e) => {
            println!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.seed_hash.is_some() {
        println!("✅ Seed matches published hash");
    }
    println!("   Crash point: {}", crash_point);

    if let Some(expected) = args.expected {
        match Multiplier::from_f64(expected) {
            Some(expected) if expected == crash_point => {
                println!("✅ Reported crash point {} confirmed", expected);
            }
            _ => {
                println!("❌ Reported crash point {} does not match", expected);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
