//! CLI subcommands and the interactive shell.
//!
//! Commands write to any [`Write`] and read confirmations from any
//! [`BufRead`], so the whole command surface can be driven from tests.

use std::io::{self, BufRead, Write};

use clap::Parser;

use todomem_proto::{BackupReason, Task, parse_instant};
use todomem_store::{ClearAllAuthorization, ClearAllRequest, StoreError};

use crate::tasks::{TaskError, TaskList};

/// Phrase the user must type to confirm wiping everything.
pub const CLEAR_ALL_PHRASE: &str = "delete everything";

/// Errors returned by [`execute`].
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A task operation failed.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Statistics could not be rendered.
    #[error("failed to encode statistics: {0}")]
    Encode(#[from] serde_json::Error),

    /// `shell` was requested from inside the shell.
    #[error("already in the shell")]
    NestedShell,
}

/// A `todomem` subcommand.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show all tasks.
    List,
    /// Add a task.
    Add {
        /// Task text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Due date (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        due: Option<String>,
    },
    /// Change a task's text.
    Edit {
        /// Task id or list position.
        task: String,
        /// New text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Set or clear a task's due date.
    Due {
        /// Task id or list position.
        task: String,
        /// Due date (YYYY-MM-DD or RFC 3339).
        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        date: Option<String>,
        /// Remove the due date.
        #[arg(long)]
        clear: bool,
    },
    /// Delete a task.
    Delete {
        /// Task id or list position.
        task: String,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Take a manual backup.
    Backup,
    /// List available backups, newest first.
    Backups,
    /// Replace all tasks with a backup's contents.
    Restore {
        /// Backup key as shown by `backups`.
        key: String,
    },
    /// Delete all tasks, backups and settings.
    Clear,
    /// Print storage statistics as JSON.
    Stats,
    /// Interactive shell; automatic backups run while it is open.
    Shell,
}

/// A line typed into the interactive shell.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Command,
}

/// Runs a single command.
///
/// # Errors
///
/// Returns [`CommandError`] if the command fails; nothing is changed in
/// that case. [`Command::Shell`] is rejected with
/// [`CommandError::NestedShell`]; use [`run_shell`] instead.
pub fn execute<R, W>(
    command: Command,
    list: &mut TaskList,
    input: &mut R,
    out: &mut W,
) -> Result<(), CommandError>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    match command {
        Command::List => print_list(list, out)?,
        Command::Add { text, due } => {
            let task = list.add(&text.join(" "), due.as_deref())?;
            writeln!(out, "Added {}", task.id)?;
        }
        Command::Edit { task, text } => {
            let task = list.edit(&task, &text.join(" "))?;
            writeln!(out, "Updated {}", task.id)?;
        }
        Command::Due { task, date, clear } => {
            let due = if clear { None } else { date.as_deref() };
            let task = list.set_due(&task, due)?;
            match &task.due_date {
                Some(due) => writeln!(out, "{} is due {due}", task.id)?,
                None => writeln!(out, "{} has no due date", task.id)?,
            }
        }
        Command::Delete { task, yes } => {
            let Some(found) = list.find(&task) else {
                return Err(TaskError::TaskNotFound(task).into());
            };
            let prompt = format!("Delete task \"{}\"?", found.text);
            if yes || confirm(input, out, &prompt)? {
                let removed = list.delete(&task)?;
                writeln!(out, "Deleted \"{}\"", removed.text)?;
            } else {
                writeln!(out, "Cancelled")?;
            }
        }
        Command::Backup => {
            let key = list.store().create_backup(BackupReason::Manual)?;
            writeln!(out, "Backup saved as {key}")?;
        }
        Command::Backups => {
            let backups = list.store().available_backups();
            if backups.is_empty() {
                writeln!(out, "No backups.")?;
            }
            for backup in backups {
                writeln!(
                    out,
                    "{}  {}  {:<16} {} task(s)",
                    backup.key,
                    display_instant(&backup.timestamp),
                    backup.reason,
                    backup.task_count
                )?;
            }
        }
        Command::Restore { key } => {
            let receipt = list.store().restore_from_backup(&key)?;
            list.reload();
            writeln!(
                out,
                "Restored {} task(s). Previous state saved as {}",
                receipt.restored, receipt.safety_backup
            )?;
            if receipt.dropped > 0 {
                writeln!(out, "Skipped {} invalid record(s)", receipt.dropped)?;
            }
        }
        Command::Clear => match confirm_clear_all(input, out)? {
            Some(authorization) => {
                list.store().clear_all_data(authorization)?;
                list.reload();
                writeln!(out, "All data cleared")?;
            }
            None => writeln!(out, "Cancelled")?,
        },
        Command::Stats => {
            let stats = list.store().memory_stats();
            writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        }
        Command::Shell => return Err(CommandError::NestedShell),
    }
    Ok(())
}

/// Reads commands line by line until `quit`, `exit` or end of input.
///
/// Errors from individual commands are printed and the shell continues.
///
/// # Errors
///
/// Returns an I/O error if reading input or writing output fails.
pub fn run_shell<R, W>(list: &mut TaskList, input: &mut R, out: &mut W) -> io::Result<()>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    writeln!(out, "todomem shell. Type 'help' for commands, 'quit' to exit.")?;
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.first() {
            None => continue,
            Some(&("quit" | "exit")) => break,
            Some(_) => {}
        }

        match ShellLine::try_parse_from(words.iter().copied()) {
            Ok(parsed) => {
                if let Err(err) = execute(parsed.command, list, input, out) {
                    tracing::debug!(error = %err, "shell command failed");
                    writeln!(out, "error: {err}")?;
                }
            }
            Err(err) => write!(out, "{}", err.render())?,
        }
    }
    tracing::debug!("shell closed");
    Ok(())
}

/// Asks for the two confirmations required before wiping all data.
///
/// The first is a yes/no question, the second requires typing
/// [`CLEAR_ALL_PHRASE`]. Returns `None` if either is declined.
///
/// # Errors
///
/// Returns an I/O error if reading input or writing output fails.
pub fn confirm_clear_all<R, W>(
    input: &mut R,
    out: &mut W,
) -> io::Result<Option<ClearAllAuthorization>>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let request = ClearAllRequest::new();
    if !confirm(
        input,
        out,
        "This deletes every task and every backup. Continue?",
    )? {
        return Ok(None);
    }
    let acknowledged = request.acknowledge();

    write!(out, "Type \"{CLEAR_ALL_PHRASE}\" to confirm: ")?;
    out.flush()?;
    if read_answer(input)? != CLEAR_ALL_PHRASE {
        return Ok(None);
    }
    Ok(Some(acknowledged.confirm()))
}

fn confirm<R, W>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<bool>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;
    let answer = read_answer(input)?.to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn read_answer<R: BufRead + ?Sized>(input: &mut R) -> io::Result<String> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn print_list<W: Write + ?Sized>(list: &TaskList, out: &mut W) -> io::Result<()> {
    if list.is_empty() {
        return writeln!(out, "No tasks yet.");
    }
    writeln!(out, "{}", list.count_label())?;
    for (i, task) in list.tasks().iter().enumerate() {
        writeln!(out, "{:>3}. {}", i + 1, describe(task))?;
    }
    Ok(())
}

fn describe(task: &Task) -> String {
    let mut line = task.text.clone();
    if let Some(due) = &task.due_date {
        line.push_str(&format!("  (due {})", display_instant(due)));
    }
    line.push_str(&format!(
        "  [{}, added {}]",
        task.id,
        display_instant(&task.created_at)
    ));
    line
}

/// Renders a stored instant as local `YYYY-MM-DD HH:MM`, or verbatim if it
/// does not parse.
fn display_instant(value: &str) -> String {
    parse_instant(value).map_or_else(
        || value.to_string(),
        |at| {
            at.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        },
    )
}
