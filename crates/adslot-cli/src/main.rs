//! Advertisement slot cache CLI.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use adslot_cache::{CacheConfig, Resolution};
use adslot_cli::commands::{load_config, run_cached, run_index, run_resolve, slot_id_from_path};
use adslot_cli::logging::{LogConfig, LogFormat, init_logging};
use adslot_cli::summary::{index_table, resolution_table};
use anyhow::Context;
use clap::{ColorChoice, Parser};
use tracing::level_filters::LevelFilter;

mod cli;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg, ResolveArgs};

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(cli.config.as_deref(), cli.cache_root.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("error: {error:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match &cli.command {
        Command::Resolve(args) => resolve(&config, args),
        Command::Cached { slot_id } => Ok(cached(&config, slot_id)),
        Command::Index { verify } => run_index(&config, *verify).map(|rows| {
            println!("Index: {}", config.index_path().display());
            println!("{}", index_table(&rows));
            ExitCode::SUCCESS
        }),
    };
    outcome.unwrap_or_else(|error| {
        eprintln!("error: {error:#}");
        ExitCode::FAILURE
    })
}

fn resolve(config: &CacheConfig, args: &ResolveArgs) -> anyhow::Result<ExitCode> {
    let slot_id = match &args.slot {
        Some(slot) => slot.clone(),
        None => slot_id_from_path(&args.definition)?,
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let resolution = runtime.block_on(run_resolve(
        config,
        &slot_id,
        &args.definition,
        args.blobs.as_deref(),
    ))?;

    println!("{}", resolution_table(&slot_id, &resolution));
    Ok(match resolution {
        Resolution::Failed { .. } => ExitCode::FAILURE,
        Resolution::Absent | Resolution::Ready(_) => ExitCode::SUCCESS,
    })
}

fn cached(config: &CacheConfig, slot_id: &str) -> ExitCode {
    match run_cached(config, slot_id) {
        Some(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("no cached asset for {slot_id}");
            ExitCode::FAILURE
        }
    }
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
