//! Primary store backends.
//!
//! - [`traits`]: the [`PrimaryStore`](traits::PrimaryStore) contract
//! - [`memory`]: in-process store for tests and embedded use
//! - [`sql`]: SQLite/MySQL via sqlx

pub mod traits;
pub mod memory;
pub mod sql;
