//! PostgreSQL implementations for production batch storage

mod batch_repository;

pub use batch_repository::*;
