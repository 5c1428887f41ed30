//! CLI module for the session timer.
//!
//! This module provides the command-line interface:
//! - `commands`: Command definitions using clap derive
//! - `client`: IPC client for daemon communication
//! - `view`: Subscriber-side view of the session
//! - `display`: Output formatting and display logic

pub mod client;
pub mod commands;
pub mod display;
pub mod view;

pub use client::{DaemonError, EventStream, IpcClient};
pub use commands::{Cli, Commands, DaemonArgs, StartArgs};
pub use display::Display;
pub use view::{SessionView, ViewUpdate};
