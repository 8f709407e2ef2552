//! Database Adapter Abstractions
//!
//! Statements reach a store only through the [`DatabaseAdapter`] trait. The
//! bundled [`SqliteAdapter`] implements it over sqlx; other drivers plug in
//! the same way.

pub mod core;
pub mod sqlite;

// Re-export core traits and types
pub use core::*;
pub use sqlite::{SqliteAdapter, SqliteAdapterConfig, SqliteAdapterConfigBuilder, SqliteTransaction};
