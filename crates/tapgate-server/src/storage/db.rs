//! SQLite database for the `TapGate` server.

tapgate_core::define_database!(Database, "TapGate database migrations complete");
