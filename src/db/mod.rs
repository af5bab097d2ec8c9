//! Database module: row mappers and SQL repositories over the archive.
//!
//! This module is split into two submodules:
//! - `model`: conversions from SQLite rows into domain entities.
//! - `repo`: SQL-only functions for posts, media and export records.
//!
//! External modules should import from `skyvault::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;
