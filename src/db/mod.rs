//! Database module for uptrail.
//!
//! Provides SQLite storage for sites, their history and alerts.

mod models;
mod store;

pub use models::*;
pub use store::*;
