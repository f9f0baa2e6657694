//! SQL statement and schema helpers for the Postgres-backed event store and projections.

pub mod event;
pub mod migrations;
