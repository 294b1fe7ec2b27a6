//! `TapGate` Core Library
//!
//! Shared functionality for `TapGate` components:
//! - Card record model and access levels
//! - Access evaluation and registration conflict policy
//! - Configuration resolution and hierarchy
//! - Common error types and database helpers

pub mod access;
pub mod card;
pub mod config;
pub mod db;
pub mod error;
pub mod registration;
pub mod tracing_init;

pub use access::{AccessDecision, AccessOutcome, AccessPolicy, ReasonCode};
pub use card::{AccessLevel, CardPatch, CardRecord, Expiry, UpdateForm, UserView};
pub use config::Config;
pub use error::{Error, Result};
pub use registration::{Registration, RegistrationForm, RegistrationVerdict};
