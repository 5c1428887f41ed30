//! Command definitions for the session timer CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::types::{EngineConfig, IdleStopPolicy};

// ============================================================================
// CLI Structure
// ============================================================================

/// Waypace - focus session timer
#[derive(Parser, Debug)]
#[command(
    name = "waypace",
    version,
    about = "集中セッションタイマー",
    long_about = "デーモンがセッションの開始・停止と残り時間を管理し、\n\
                  CLIやUIはUnixソケット経由で状態の取得やイベントの購読を行います。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path of the daemon socket (default: ~/.waypace/waypace.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start a new session
    Start(StartArgs),

    /// Stop the running session
    Stop,

    /// Show the current session state
    Status,

    /// Follow state changes and remaining time
    Watch,

    /// Run the session daemon
    Daemon(DaemonArgs),

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Start Command Arguments
// ============================================================================

/// Arguments for the start command
#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Planned duration in seconds (daemon default when omitted)
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        allow_negative_numbers = true,
        conflicts_with = "minutes"
    )]
    pub duration: Option<i64>,

    /// Planned duration in minutes (1-1440)
    #[arg(
        short,
        long,
        value_name = "MINUTES",
        value_parser = clap::value_parser!(u32).range(1..=1440)
    )]
    pub minutes: Option<u32>,
}

impl StartArgs {
    /// Planned duration in seconds, if one was given.
    ///
    /// Non-positive values are passed through for the daemon to reject.
    pub fn planned_duration_sec(&self) -> Option<i64> {
        self.duration
            .or_else(|| self.minutes.map(|minutes| i64::from(minutes) * 60))
    }
}

// ============================================================================
// Daemon Command Arguments
// ============================================================================

/// Arguments for the daemon command
#[derive(Args, Debug, Clone, Default)]
pub struct DaemonArgs {
    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Default planned duration in seconds
    #[arg(long, value_name = "SECONDS")]
    pub default_duration: Option<u64>,

    /// Tick interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Let `stop` succeed while idle instead of failing
    #[arg(long)]
    pub lenient_stop: bool,
}

impl DaemonArgs {
    /// Builds the engine configuration: defaults, then the config file, then
    /// flags.
    pub fn resolve_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };

        if let Some(seconds) = self.default_duration {
            config.default_duration_sec = seconds;
        }
        if let Some(millis) = self.tick_ms {
            config.tick_interval_ms = millis;
        }
        if self.lenient_stop {
            config.stop_when_idle = IdleStopPolicy::Ignore;
        }

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
