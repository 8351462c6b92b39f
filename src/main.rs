use anyhow::Result;
use clap::Parser;

use docdex::cli::{Cli, run_command};

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up OPENAI_API_KEY and friends from a local .env if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    run_command(cli.command, cli.verbose).await
}
