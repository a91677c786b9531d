//! The in-memory task list and its persistence round trip.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;

use todomem_proto::Task;
use todomem_store::{Clock, TaskStore};

use super::{DEFAULT_MAX_TEXT_LEN, TaskError};

const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 6;

/// Ordered list of tasks backed by a [`TaskStore`].
///
/// Tasks are kept in insertion order. Every mutation is saved before it is
/// applied locally, so a failed save leaves the list as it was.
pub struct TaskList {
    store: Arc<TaskStore>,
    clock: Arc<dyn Clock>,
    tasks: Vec<Task>,
    max_text_len: usize,
}

impl std::fmt::Debug for TaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskList")
            .field("tasks", &self.tasks.len())
            .field("max_text_len", &self.max_text_len)
            .finish_non_exhaustive()
    }
}

impl TaskList {
    /// Loads the list from `store`.
    #[must_use]
    pub fn load(store: Arc<TaskStore>, clock: Arc<dyn Clock>) -> Self {
        let tasks = store.load();
        tracing::debug!(tasks = tasks.len(), "task list loaded");
        Self {
            store,
            clock,
            tasks,
            max_text_len: DEFAULT_MAX_TEXT_LEN,
        }
    }

    /// Sets the maximum task text length in characters.
    #[must_use]
    pub const fn with_max_text_len(mut self, max: usize) -> Self {
        self.max_text_len = max;
        self
    }

    /// Re-reads the list from the store, e.g. after a restore.
    pub fn reload(&mut self) {
        self.tasks = self.store.load();
    }

    /// The store this list persists to.
    #[must_use]
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Current tasks in insertion order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` when there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `"1 task"` or `"N tasks"`.
    #[must_use]
    pub fn count_label(&self) -> String {
        match self.tasks.len() {
            1 => "1 task".to_string(),
            n => format!("{n} tasks"),
        }
    }

    /// Returns `true` if another task already has `text` (trimmed,
    /// compared case-insensitively). The task with id `except` is ignored.
    #[must_use]
    pub fn is_duplicate(&self, text: &str, except: Option<&str>) -> bool {
        let wanted = text.trim().to_lowercase();
        self.tasks
            .iter()
            .filter(|t| Some(t.id.as_str()) != except)
            .any(|t| t.text.trim().to_lowercase() == wanted)
    }

    /// Finds a task by exact id, or by its 1-based position in the list.
    #[must_use]
    pub fn find(&self, selector: &str) -> Option<&Task> {
        self.position(selector).map(|i| &self.tasks[i])
    }

    fn position(&self, selector: &str) -> Option<usize> {
        let selector = selector.trim();
        if let Some(i) = self.tasks.iter().position(|t| t.id == selector) {
            return Some(i);
        }
        selector
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|&i| i < self.tasks.len())
    }

    fn require(&self, selector: &str) -> Result<usize, TaskError> {
        self.position(selector)
            .ok_or_else(|| TaskError::TaskNotFound(selector.to_string()))
    }

    /// Appends a new task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TextEmpty`], [`TaskError::TextTooLong`],
    /// [`TaskError::Duplicate`] or [`TaskError::InvalidDueDate`] for bad
    /// input, or [`TaskError::Store`] if the save fails.
    pub fn add(&mut self, text: &str, due: Option<&str>) -> Result<&Task, TaskError> {
        let text = self.validate_text(text, None)?;
        let due_date = due.map(parse_due_date).transpose()?;
        let now = self.clock.now();
        let task = Task::new(new_task_id(now, &mut rand::rng()), text, now, due_date);

        let mut next = self.tasks.clone();
        next.push(task);
        self.persist(next)?;
        tracing::info!(tasks = self.tasks.len(), "task added");
        Ok(&self.tasks[self.tasks.len() - 1])
    }

    /// Replaces a task's text.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] for an unknown selector, the
    /// text errors of [`add`](Self::add), or [`TaskError::Store`].
    pub fn edit(&mut self, selector: &str, text: &str) -> Result<&Task, TaskError> {
        let index = self.require(selector)?;
        let id = self.tasks[index].id.clone();
        let text = self.validate_text(text, Some(&id))?;

        let mut next = self.tasks.clone();
        next[index].text = text;
        self.persist(next)?;
        tracing::info!(%id, "task edited");
        Ok(&self.tasks[index])
    }

    /// Sets or clears a task's due date.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`], [`TaskError::InvalidDueDate`] or
    /// [`TaskError::Store`].
    pub fn set_due(&mut self, selector: &str, due: Option<&str>) -> Result<&Task, TaskError> {
        let index = self.require(selector)?;
        let due_date = due.map(parse_due_date).transpose()?;

        let mut next = self.tasks.clone();
        next[index].due_date = due_date;
        self.persist(next)?;
        Ok(&self.tasks[index])
    }

    /// Removes a task and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskNotFound`] or [`TaskError::Store`].
    pub fn delete(&mut self, selector: &str) -> Result<Task, TaskError> {
        let index = self.require(selector)?;
        let mut next = self.tasks.clone();
        let removed = next.remove(index);
        self.persist(next)?;
        tracing::info!(id = %removed.id, "task deleted");
        Ok(removed)
    }

    fn validate_text(&self, text: &str, except: Option<&str>) -> Result<String, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::TextEmpty);
        }
        if text.chars().count() > self.max_text_len {
            return Err(TaskError::TextTooLong {
                max: self.max_text_len,
            });
        }
        if self.is_duplicate(text, except) {
            return Err(TaskError::Duplicate(text.to_string()));
        }
        Ok(text.to_string())
    }

    fn persist(&mut self, next: Vec<Task>) -> Result<(), TaskError> {
        self.store.save(&next)?;
        self.tasks = next;
        Ok(())
    }
}

/// Generates a task id: `<epoch-millis>-<6 base-36 characters>`.
pub fn new_task_id<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]))
        .collect();
    format!("{}-{suffix}", now.timestamp_millis())
}

/// Validates a due date given as `YYYY-MM-DD` or RFC 3339.
///
/// The accepted string is returned trimmed but otherwise unchanged.
///
/// # Errors
///
/// Returns [`TaskError::InvalidDueDate`] for anything else.
pub fn parse_due_date(value: &str) -> Result<String, TaskError> {
    let value = value.trim();
    let is_date = NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok();
    if is_date || DateTime::parse_from_rfc3339(value).is_ok() {
        Ok(value.to_string())
    } else {
        Err(TaskError::InvalidDueDate(value.to_string()))
    }
}
