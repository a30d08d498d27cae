use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "onchain-wallet-analyzer",
    version,
    about = "Wallet activity analyzer: inflow/outflow, daily activity and counterparties"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Override bind address, e.g. 0.0.0.0:4000
        #[arg(long)]
        addr: Option<String>,
    },
    /// Analyze one wallet and print the result as JSON
    Analyze {
        /// 0x-prefixed wallet address
        #[arg(long)]
        address: String,
        /// Lookback window: 7d, 30d or 90d
        #[arg(long, default_value = "30d")]
        range: String,
        /// Read raw events from a JSON array instead of the data source
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        pretty: bool,
    },
}
