use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sitegen::Provider;

/// Generate a website preview from a prompt
#[derive(Debug, Parser)]
#[command(name = "sitegen")]
#[command(version)]
#[command(about = "Generate a sanitized website preview from a prompt", long_about = None)]
pub struct Args {
    /// Backend provider (default: config/provider or "ollama")
    #[arg(long = "provider", value_enum)]
    pub provider: Option<Provider>,

    /// Model name
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Base URL of the HTTP/SSE backend
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// WebSocket stream URL
    #[arg(long = "ws-url", value_name = "URL")]
    pub ws_url: Option<String>,

    /// Skip the GET event stream and stream over POST directly
    #[arg(long = "no-event-source")]
    pub no_event_source: bool,

    /// Give up on a tier after this many silent seconds
    #[arg(long = "idle-timeout", value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Skip every backend and generate locally
    #[arg(long = "offline")]
    pub offline: bool,

    /// Write the HTML here instead of stdout
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    pub out: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the sanitized contents of an HTML file
    Sanitize {
        /// File to read
        file: PathBuf,
    },
}
