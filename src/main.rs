//! Moonshine Flow CLI entry point

use std::process::ExitCode;

use clap::Parser;

use moonshine_flow::cli::{run, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    run(Cli::parse()).await
}
