mod cli;
mod session;
mod terminal;
mod web;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("number_cards=info")),
        )
        .init();

    cli::load_env_file(&cli::env_file_name());
    let cli = Cli::parse();
    cli.run().await
}
