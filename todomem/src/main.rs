//! `todomem`: command-line to-do list.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/todomem/config.toml`).
//!
//! ```bash
//! todomem add Buy milk --due 2024-06-01
//! todomem list
//! todomem backups
//! todomem restore todo-backup-1717200000000
//!
//! # Interactive, with hourly automatic backups
//! todomem shell
//! ```

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use todomem::commands::{self, Command, CommandError};
use todomem::config::{CliArgs, TodoConfig};
use todomem::tasks::TaskList;
use todomem_store::{Clock, SystemClock, TaskStore, spawn_auto_backup};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match TodoConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            TodoConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(data_file = %config.data_file.display(), "todomem starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(config.open_store(Arc::clone(&clock)));
    if !store.is_durable() {
        eprintln!(
            "Warning: {} is unavailable; changes will be lost on exit",
            config.data_file.display()
        );
    }
    let mut list = TaskList::load(Arc::clone(&store), clock).with_max_text_len(config.max_text_len);

    let result = match cli.command.unwrap_or(Command::List) {
        Command::Shell => run_shell(list, store, config.auto_backup_interval).await,
        command => {
            let mut input = io::stdin().lock();
            let mut out = io::stdout().lock();
            commands::execute(command, &mut list, &mut input, &mut out)
        }
    };

    tracing::info!("todomem exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Routes tracing output to a log file.
///
/// Stdout carries only command results (task listings, `stats` JSON) so it
/// can be piped, and stderr is reserved for user-facing warnings. Defaults
/// to `$TMPDIR/todomem.log`; `RUST_LOG` overrides `--log-level`.
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("todomem.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Runs the interactive shell on a blocking thread while the automatic
/// backup timer ticks in the background.
async fn run_shell(
    mut list: TaskList,
    store: Arc<TaskStore>,
    interval: Duration,
) -> Result<(), CommandError> {
    let auto_backup = store
        .is_durable()
        .then(|| spawn_auto_backup(Arc::clone(&store), interval));

    let shell = tokio::task::spawn_blocking(move || {
        let mut input = io::stdin().lock();
        let mut out = io::stdout().lock();
        commands::run_shell(&mut list, &mut input, &mut out)
    })
    .await;

    if let Some(handle) = auto_backup {
        handle.abort();
    }

    match shell {
        Ok(result) => result.map_err(CommandError::from),
        Err(join_err) => Err(CommandError::Io(io::Error::other(join_err))),
    }
}
