//! Rebuild strategies over [`ProjectionEngine`] (spec.md §4.3 "Rebuild").
//!
//! The teacher's `PgRebuilder` offers two strategies: `by_aggregate_id`
//! (delete-then-replay one aggregate's handlers at a time) and `all_at_once`
//! (delete every aggregate, then replay the whole log in one transaction).
//! This crate's single shared `events` table has no per-aggregate-type table
//! to delete selectively, so only the `all_at_once` shape generalizes here:
//! clear every named projection, reset its bookmark, and replay from
//! position zero.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::projection::{ProjectionEngine, RunReport};
use crate::store::EventStore;

#[async_trait]
pub trait Rebuilder {
    /// Clears and replays a single projection from the beginning.
    async fn rebuild_one(&self, projection_name: &str, batch_size: u32) -> Result<RunReport, DomainError>;

    /// Clears and replays every registered projection from the beginning, in registration order.
    async fn rebuild_all(&self, batch_size: u32) -> Result<Vec<RunReport>, DomainError>;
}

#[async_trait]
impl<S: EventStore> Rebuilder for ProjectionEngine<S> {
    async fn rebuild_one(&self, projection_name: &str, batch_size: u32) -> Result<RunReport, DomainError> {
        self.rebuild(projection_name, batch_size).await
    }

    async fn rebuild_all(&self, batch_size: u32) -> Result<Vec<RunReport>, DomainError> {
        let names = self.projection_names();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            reports.push(self.rebuild(name, batch_size).await?);
        }
        Ok(reports)
    }
}
