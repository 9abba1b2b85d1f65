//! Core data models for the file-sharing service.
//!
//! These entities describe stored files, the two kinds of share grants and the
//! append-only access log. They map to the tables in `migrations/0001_init.sql`
//! via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod access_log;
pub mod file;
pub mod share;
