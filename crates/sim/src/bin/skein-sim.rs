//! Skein network simulator CLI.
//!
//! Runs a small validator set in one process and pushes a workload of
//! transfer transactions through it, round-robin across producers.
//!
//! # Example
//!
//! ```bash
//! # Four validators, eight transactions
//! skein-sim -v 4 -t 8
//!
//! # Tighter rounds, different key seed
//! skein-sim --gap-ms 100 --seed 7
//! ```

use clap::Parser;
use skein_kernel::KernelError;
use skein_sim::{SimConfig, SimNetwork};
use skein_types::{Hash, Input, KeyPair, Output, Transaction};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skein-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of validators
    #[arg(short = 'v', long, default_value = "4")]
    validators: usize,

    /// Number of transactions to push through the network
    #[arg(short = 't', long, default_value = "8")]
    transactions: usize,

    /// Snapshot round gap in milliseconds
    #[arg(long, default_value = "250")]
    gap_ms: u64,

    /// Seed for deterministic validator keys
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<(), KernelError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,skein_sim=info")),
        )
        .init();

    let args = Args::parse();
    info!(
        validators = args.validators,
        transactions = args.transactions,
        gap_ms = args.gap_ms,
        seed = args.seed,
        "starting simulation"
    );

    let mut net = SimNetwork::new(SimConfig {
        validators: args.validators,
        snapshot_round_gap: Duration::from_millis(args.gap_ms),
        seed: args.seed,
    })?;

    for i in 0..args.transactions {
        let source = Hash::from_bytes(format!("allocation {i}").as_bytes());
        let output = Output {
            amount: 100,
            owner: KeyPair::from_seed(&[i as u8; 32]).public_key(),
        };
        net.credit_everywhere(source, 0, output);

        let origin = i % net.validator_count();
        net.submit(
            origin,
            Transaction {
                inputs: vec![Input { source, index: 0 }],
                outputs: vec![output],
                extra: i.to_be_bytes().to_vec(),
            },
        )?;
        net.run_until_quiescent(10_000)?;
    }

    for i in 0..net.validator_count() {
        info!(
            node = %net.node(i).id(),
            finalized = net.finalized_count(i),
            "validator summary"
        );
    }
    let stats = net.stats();
    info!(
        delivered = stats.delivered,
        dropped = stats.dropped_unknown,
        "simulation complete"
    );
    Ok(())
}
