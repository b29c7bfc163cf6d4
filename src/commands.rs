//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the configuration file. Defaults to `config.yaml` in the
    /// platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Chat with the documentation from the terminal.
    #[clap(name = "chat", alias = "c")]
    Chat,

    /// Run the web service (REST + WebSocket).
    #[clap(name = "serve", alias = "s")]
    Serve,

    /// Write a default configuration file.
    Init,
}
