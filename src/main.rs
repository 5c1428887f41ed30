//! Waypace CLI - focus session timer
//!
//! A long-running daemon owns the session: it starts and stops it, counts
//! the remaining time down and ends it on its own when time runs out. The
//! other subcommands talk to the daemon over a Unix socket.

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};

use waypace::cli::{Cli, Commands, Display, IpcClient, SessionView};
use waypace::daemon;

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(cli.verbose);

    // Execute command
    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    match cli.command {
        Some(Commands::Start(args)) => {
            let client = connect_client(cli.socket)?;
            let state = client.start(args.planned_duration_sec()).await?;
            Display::show_start_success(&state);
        }
        Some(Commands::Stop) => {
            let client = connect_client(cli.socket)?;
            let state = client.stop().await?;
            Display::show_stop_success(&state);
        }
        Some(Commands::Status) => {
            let client = connect_client(cli.socket)?;
            let state = client.get_state().await?;
            Display::show_status(&state);
        }
        Some(Commands::Watch) => {
            let client = connect_client(cli.socket)?;
            watch(&client).await?;
        }
        Some(Commands::Daemon(args)) => {
            let config = args.resolve_config()?;
            let socket_path = resolve_socket_path(cli.socket)?;
            daemon::run(config, &socket_path).await?;
        }
        Some(Commands::Completions { shell }) => {
            generate_completions(shell);
        }
        None => {
            // No command provided, show help
            Cli::command().print_help()?;
        }
    }

    Ok(())
}

fn connect_client(socket: Option<PathBuf>) -> Result<IpcClient> {
    match socket {
        Some(path) => Ok(IpcClient::with_socket_path(path)),
        None => IpcClient::new(),
    }
}

fn resolve_socket_path(socket: Option<PathBuf>) -> Result<PathBuf> {
    match socket {
        Some(path) => Ok(path),
        None => daemon::default_socket_path(),
    }
}

/// Prints the current state, then every change until the daemon goes away.
async fn watch(client: &IpcClient) -> Result<()> {
    let mut events = client.subscribe().await?;
    let mut view = SessionView::new(events.initial_state().clone());
    Display::show_status(view.state());

    while let Some(event) = events.next_event().await? {
        let update = view.apply(&event);
        Display::show_update(&view, update);
    }

    tracing::info!("Daemonとの接続が終了しました");
    Ok(())
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================
