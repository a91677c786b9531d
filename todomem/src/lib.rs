//! `todomem`: a local to-do list with validated persistence and rotating
//! backups.
//!
//! The persistence core lives in `todomem-store`; this crate adds the
//! caller layer ([`tasks::TaskList`]), configuration, and the CLI commands.

pub mod commands;
pub mod config;
pub mod tasks;
