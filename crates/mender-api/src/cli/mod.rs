//! CLI command definitions for the `mender` binary.
//!
//! Uses clap derive macros for argument parsing. `serve` runs the engine
//! behind the REST API; `run` drives a single workflow in-process; `list`
//! and `show` read the local store.

pub mod serve;
pub mod workflow;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use mender_observe::LogFormat;

/// Run self-healing task workflows.
#[derive(Parser)]
#[command(name = "mender", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format: text or json.
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the chosen verbosity. `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn,mender=info,tower_http=info",
            1 => "info,mender=debug,tower_http=debug",
            _ => "trace",
        }
    }
}

/// Storage and executor switches shared by commands that start the engine.
#[derive(Debug, Clone, Copy, Args)]
pub struct EngineArgs {
    /// Keep workflows in memory; nothing is persisted.
    #[arg(long)]
    pub memory: bool,

    /// Simulate every task instead of running real HTTP, compute or IO work.
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API and the workflow engine.
    Serve {
        /// Host to bind to (defaults to `server.host` from config.toml).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to `server.port` from config.toml).
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Create a workflow from a JSON or YAML file and drive it to completion.
    Run {
        /// Path to the workflow request file.
        file: PathBuf,

        /// Give up waiting after this many seconds.
        #[arg(long, default_value = "600")]
        timeout_secs: u64,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// List the most recent workflows.
    #[command(alias = "ls")]
    List {
        /// Maximum number of workflows to show.
        #[arg(long)]
        limit: Option<u32>,

        /// Skip this many of the newest workflows.
        #[arg(long, default_value = "0")]
        skip: u32,
    },

    /// Show one workflow and its task chain.
    Show {
        /// Workflow id.
        id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
