//! ConvTile CLI
//!
//! Searches every layer of a network description for the loop order and tile
//! sizes with the least off-chip traffic, writes one JSON report per layer and
//! prints the network total.
//!
//! # Usage
//! ```bash
//! cargo run --bin convtile -- \
//!   --network resnet18.json \
//!   --mem-size 108 \
//!   --timeout 60 \
//!   --parallel
//! ```
//!
//! Network file format:
//! ```text
//! {
//!   "name": "resnet18",
//!   "batch": 1,
//!   "layers": [
//!     { "name": "conv1", "height": 112, "width": 112, "in_chan": 3, "out_chan": 64,
//!       "kernel": 7, "stride": 2, "compression": { "input": 1.0, "output": 0.5, "weight": 1.0 } }
//!   ]
//! }
//! ```

use clap::Parser;
use convtile::report::{network_summary, write_layer_report};
use convtile::{search_network_with, NetworkDescription, SearchConfig, SolverConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[clap(name = "convtile")]
#[clap(about = "Loop-order and tile-size search for convolution layers")]
#[clap(version = "0.1")]
struct Args {
    /// Network description (JSON)
    #[clap(long = "network", short = 'n', value_name = "FILE")]
    network: PathBuf,

    /// Output directory for per-layer reports (default: results/<network name>)
    #[clap(long = "dir", short = 'd', value_name = "DIR")]
    dir: Option<PathBuf>,

    /// On-chip memory size in KiB
    #[clap(long = "mem-size", default_value = "108")]
    mem_size: u64,

    /// Per-candidate solver timeout in seconds (0 disables it)
    #[clap(long = "timeout", default_value = "60")]
    timeout: u64,

    /// Maximum branch-and-bound nodes per candidate
    #[clap(long = "max-nodes", default_value = "5000000")]
    max_nodes: usize,

    /// Solve loop-order candidates concurrently
    #[clap(long = "parallel")]
    parallel: bool,

    /// Enable verbose output
    #[clap(long = "verbose", short = 'v')]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let network = NetworkDescription::load(&args.network)?;
    let dir = args
        .dir
        .unwrap_or_else(|| PathBuf::from("results").join(&network.name));

    let config = SearchConfig {
        solver: SolverConfig {
            timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            max_nodes: args.max_nodes,
            ..SolverConfig::default()
        },
        parallel: args.parallel,
        ..SearchConfig::default()
    };

    log::info!(
        "Network '{}': {} layer(s), on-chip memory {} KiB",
        network.name,
        network.layers.len(),
        args.mem_size
    );

    let result = search_network_with(
        &network,
        args.mem_size * 1024,
        &config,
        |layer| -> Result<(), Box<dyn std::error::Error>> {
            let path = write_layer_report(&dir, &layer.name, &layer.result)?;
            log::info!("Wrote {}", path.display());
            Ok(())
        },
    )?;

    println!("{}", network_summary(&result));
    Ok(())
}
