//! # ticketq
//!
//! SQLite-backed ticket workflow engine for coordinating autonomous workers.
//!
//! Tickets move through an explicit state machine. Workers hold time-boxed
//! exclusive claims (leases) on them, dependencies gate when a ticket may be
//! worked, and every change is written to an append-only activity log.
//! Observability goes through `tracing` and OpenTelemetry.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;
