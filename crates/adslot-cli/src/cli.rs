//! CLI argument definitions for the slot cache tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "adslot",
    version,
    about = "Inspect and fill the local advertisement slot cache",
    long_about = "Inspect and fill the local advertisement slot cache.\n\n\
                  Resolves slot definitions against blob storage, reports what the\n\
                  cache index holds, and looks up cached assets without network access."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Cache configuration file (JSON).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache root directory (overrides the configuration file).
    #[arg(long = "cache-root", value_name = "DIR", global = true)]
    pub cache_root: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve a slot definition document, filling the cache on a miss.
    Resolve(ResolveArgs),

    /// Print the cached file for a slot without touching the network.
    Cached {
        /// Slot identifier.
        #[arg(value_name = "SLOT_ID")]
        slot_id: String,
    },

    /// List every entry in the cache index.
    Index {
        /// Re-hash each cached file and compare with the recorded digest.
        #[arg(long = "verify")]
        verify: bool,
    },
}

#[derive(Parser)]
pub struct ResolveArgs {
    /// Path to a JSON slot definition document.
    #[arg(value_name = "DEFINITION")]
    pub definition: PathBuf,

    /// Slot identifier (default: the definition file name without extension).
    #[arg(long = "slot", value_name = "SLOT_ID")]
    pub slot: Option<String>,

    /// Serve blobs from a local directory laid out as `{bucket}/{path}`.
    #[arg(long = "blobs", value_name = "DIR")]
    pub blobs: Option<PathBuf>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
