//! # Camdrop Server
//!
//! Daemon wiring for [`camdrop_core`]: configuration loading, the
//! Redis-backed camera directory, and startup/shutdown of the ingest
//! pipeline.

pub mod infra;
