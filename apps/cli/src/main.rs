//! docchat CLI — upload a document and chat about it.
//!
//! Converts a file through the conversion service, stores the markdown, and
//! answers questions grounded in it through the QA service.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
