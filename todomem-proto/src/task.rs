//! The persisted task schema and its validation rules.
//!
//! Records are validated from untyped JSON so that malformed entries found
//! in storage (or handed over by a caller) can be dropped one by one instead
//! of failing the whole collection.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single to-do entry as stored in the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Opaque unique identifier.
    pub id: String,
    /// Trimmed, non-empty task text.
    pub text: String,
    /// ISO-8601 creation instant.
    pub created_at: String,
    /// Optional ISO-8601 due date; serialized as `null` when absent.
    #[serde(default)]
    pub due_date: Option<String>,
}

impl Task {
    /// Creates a task stamped with `created_at`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
        due_date: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            created_at: format_instant(created_at),
            due_date,
        }
    }

    /// Validates and sanitizes an untyped record.
    ///
    /// Returns `None` when the record fails [`is_valid_record`]; otherwise
    /// the sanitized task (see [`sanitize_record`]).
    #[must_use]
    pub fn from_record(record: &Value, now: DateTime<Utc>) -> Option<Self> {
        if !is_valid_record(record) {
            return None;
        }
        sanitize_record(record, now)
    }

    /// Parsed creation instant, if the stored string is valid.
    #[must_use]
    pub fn created_instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.created_at)
    }

    /// Parsed due instant, if any.
    #[must_use]
    pub fn due_instant(&self) -> Option<DateTime<Utc>> {
        self.due_date.as_deref().and_then(parse_instant)
    }
}

/// Returns `true` if `record` is an object with a non-blank string `id`,
/// a non-blank string `text` and a `createdAt` that parses to an instant.
///
/// `dueDate` is not checked here; an invalid one is nulled by sanitization.
#[must_use]
pub fn is_valid_record(record: &Value) -> bool {
    let Some(obj) = record.as_object() else {
        return false;
    };
    non_blank(obj, "id").is_some()
        && non_blank(obj, "text").is_some()
        && obj.get("createdAt").and_then(instant_from_value).is_some()
}

/// Normalizes a record to the canonical schema.
///
/// `id` and `text` are trimmed, `createdAt` falls back to `now` when it is
/// missing or invalid, and an invalid `dueDate` becomes `None`. Valid date
/// strings are kept verbatim; numeric epoch-millisecond dates are rewritten
/// as ISO-8601. Returns `None` only when `id` or `text` is unusable.
#[must_use]
pub fn sanitize_record(record: &Value, now: DateTime<Utc>) -> Option<Task> {
    let obj = record.as_object()?;
    let id = non_blank(obj, "id")?;
    let text = non_blank(obj, "text")?;

    let created_at = obj
        .get("createdAt")
        .and_then(canonical_instant)
        .unwrap_or_else(|| format_instant(now));
    let due_date = obj.get("dueDate").and_then(canonical_instant);

    Some(Task {
        id: id.to_string(),
        text: text.to_string(),
        created_at,
        due_date,
    })
}

fn non_blank<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn canonical_instant(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if is_valid_instant(s) => Some(s.clone()),
        Value::Number(_) => instant_from_value(value).map(format_instant),
        _ => None,
    }
}

/// Interprets a JSON value as an instant: a date string, or an integer
/// number of milliseconds since the Unix epoch.
#[must_use]
pub fn instant_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_instant(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Parses an ISO-8601 / RFC 3339 instant or a bare calendar date.
///
/// Accepted forms: full RFC 3339 with offset, `YYYY-MM-DDTHH:MM[:SS[.fff]]`
/// (taken as UTC), `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (UTC midnight).
#[must_use]
pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Returns `true` if `value` parses with [`parse_instant`].
#[must_use]
pub fn is_valid_instant(value: &str) -> bool {
    parse_instant(value).is_some()
}

/// Formats an instant as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
