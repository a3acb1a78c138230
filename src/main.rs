//! Rotocast - rotating message broadcaster.
//!
//! This is the main entry point.

use clap::Parser;
use std::process::ExitCode;

mod broadcast;
mod catalog;
mod cli;
mod config;
mod error;
mod logging;
mod manager;
mod scheduler;
mod store;

use cli::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    // Parse command line arguments
    let args = Commands::parse();

    // Run the command
    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
