//! `inbox` command-line client: live conversation follow over the push channel.

mod bootstrap_helpers;
mod cli_args;
mod follow_command;
mod http_api;
mod live_source;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, CliCommand};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        CliCommand::Follow(args) => follow_command::run_follow_command(args).await,
    }
}
