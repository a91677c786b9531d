//! Caller-side task editing for `todomem`.
//!
//! [`TaskList`] is the layer between user input and the
//! [`TaskStore`](todomem_store::TaskStore): it trims and validates text,
//! rejects case-insensitive duplicates, generates ids, checks due dates and
//! writes the whole collection back after every change.

pub mod list;

pub use list::{TaskList, new_task_id, parse_due_date};

use thiserror::Error;
use todomem_store::StoreError;

/// Default maximum task text length, in characters.
pub const DEFAULT_MAX_TEXT_LEN: usize = 256;

/// Errors that can occur during task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task text is empty after trimming.
    #[error("task text cannot be empty")]
    TextEmpty,
    /// Task text exceeds the configured maximum length.
    #[error("task text too long (max {max} characters)")]
    TextTooLong {
        /// Configured limit.
        max: usize,
    },
    /// A task with the same text (ignoring case) already exists.
    #[error("a task named \"{0}\" already exists")]
    Duplicate(String),
    /// No task matches the given id or position.
    #[error("task not found: {0}")]
    TaskNotFound(String),
    /// The due date is neither `YYYY-MM-DD` nor RFC 3339.
    #[error("invalid due date {0:?} (expected YYYY-MM-DD or RFC 3339)")]
    InvalidDueDate(String),
    /// The change could not be persisted; the list is unchanged.
    #[error("failed to save tasks: {0}")]
    Store(#[from] StoreError),
}
