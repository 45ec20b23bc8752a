//! SQLite implementations for single-node deployments
//!
//! Provides a batch repository backed by a local database file or an
//! in-memory database.

mod batch_repository;

pub use batch_repository::*;
