//! SQLite storage for the `TapGate` server.
//!
//! Provides persistence for card records and the tap audit log.

mod db;
mod models;
mod queries_cards;
mod queries_events;


pub use db::Database;
pub use models::*;
pub use tapgate_core::db::DatabaseError;
