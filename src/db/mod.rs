//! Database module: row models and SQL repositories.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions over the `items` and `enrichments` tables.
//!
//! Callers import from `signal_relay::db`; the repository API is re-exported
//! here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{EnrichmentRow, StoredItem};
