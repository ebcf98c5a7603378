//! Database module: the dedup store and its SQL repositories.
//!
//! - `model`: the store error type.
//! - `repo`: SQL-only functions over the SQLite pool.
//! - `store`: the [`DedupStore`] seam the delivery queue depends on.
//!
//! External modules import from `tg_relaybot::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;

pub use model::StoreError;
pub use store::{DedupStore, SqliteDedupStore};
