//! `TapGate` server library.
//!
//! Card tap evaluation, registration, the tap audit log and live
//! notifications over HTTP and WebSocket.

pub mod error;
pub mod gate;
pub mod notifier;
pub mod retention;
pub mod routes;
pub mod storage;
pub mod ws;
