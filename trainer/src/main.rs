use std::path::PathBuf;

use clap::Parser;
use log::info;

use trainer::{Config, train};

/// Trains a multi domain audio autoencoder.
#[derive(Debug, Parser)]
#[command(name = "train", version)]
struct Args {
    /// The JSON configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// This process' rank within the group.
    #[arg(short, long, default_value_t = 0)]
    rank: usize,

    /// The process group to join, empty trains on a single device.
    #[arg(short, long, default_value = "")]
    group_name: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    let report = train(&config, args.rank, &args.group_name)?;
    info!(
        rank = args.rank;
        "training finished at iteration {}", report.final_iteration
    );

    Ok(())
}
