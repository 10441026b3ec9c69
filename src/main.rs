mod ani_cli;
mod app;
mod catalog;
mod cli;
mod config;
mod db;
mod engine;
mod error;
mod history;
mod http;
mod library;
mod logging;
mod orchestrator;
mod paths;
mod player;
mod poster;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    app::run(cli)
}
