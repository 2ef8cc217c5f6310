mod chat;
mod cli;
mod commands;
mod config;
mod embedding;
mod error;
mod model;
mod pipeline;
mod rasterize;
mod store;
mod util;
mod window;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::error::PipelineError;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        if let Some(name) = missing_credential(&err) {
            eprintln!("{name} is not set; export it and try again");
        }
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index(args) => commands::index::run(args),
        Commands::Query(args) => commands::query::run(args),
        Commands::Fetch(args) => commands::fetch::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Chat(args) => commands::chat::run(args),
    }
}

fn missing_credential(err: &anyhow::Error) -> Option<&'static str> {
    err.chain()
        .find_map(|cause| match cause.downcast_ref::<PipelineError>() {
            Some(PipelineError::MissingCredential(name)) => Some(*name),
            _ => None,
        })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
