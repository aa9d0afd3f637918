//! Repository layer: function-based operations over a `rusqlite::Connection`.
//!
//! Mutations of shared records are single conditional statements (upserts with
//! a `WHERE` guard, or `DELETE ... WHERE state = ...`). Nothing here reads a row
//! and writes it back in a separate statement, with the exception of the WORM
//! append which runs inside a `BEGIN IMMEDIATE` transaction.

mod devices;
mod export_runs;
mod idempotency;
mod replay;
mod worm;

pub use devices::*;
pub use export_runs::*;
pub use idempotency::*;
pub use replay::*;
pub use worm::*;
