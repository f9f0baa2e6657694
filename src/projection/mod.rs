//! The Projection Engine (C3): consumes the event log and applies handlers that
//! write denormalized read tables, tracking per-projection progress and failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::DomainError;
use crate::event::Event;
use crate::store::EventStore;
use crate::types::Position;

/// A denormalized read view derived by applying `apply` to every event whose
/// type is in `event_types`, in global position order (spec.md §4.3).
///
/// `apply` MUST be idempotent: because it runs at-least-once in the presence
/// of failures (spec.md §4.3 "Idempotence"), a correct implementation upserts
/// keyed by aggregate id (+ sequence, where ordering within the row matters)
/// rather than blindly inserting or incrementing.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    fn event_types(&self) -> &[&'static str];

    async fn apply(&self, event: &Event) -> Result<(), DomainError>;

    /// Clears this projection's read model. Used by [`ProjectionEngine::rebuild`].
    async fn clear(&self) -> Result<(), DomainError>;
}

/// Tracks the highest event position each projection has consumed, per
/// `(instance_id, aggregate_type)` partition is the spec's exact model;
/// for simplicity (and because a projection's own `apply` already scopes by
/// instance) this engine keys bookmarks by projection name alone, which is
/// sufficient as long as `apply` itself performs the tenant scoping — see
/// DESIGN.md for the rationale.
#[async_trait]
pub trait Bookmark: Send + Sync {
    async fn last_position(&self, projection: &str) -> Result<Position, DomainError>;
    async fn advance(&self, projection: &str, position: Position) -> Result<(), DomainError>;
    async fn reset(&self, projection: &str) -> Result<(), DomainError>;
}

/// Records applications that failed so they can be retried, alerted on, or
/// inspected, without blocking the rest of the log (spec.md §4.3, §5
/// "Failure isolation").
#[async_trait]
pub trait FailedEventsStore: Send + Sync {
    async fn record_failure(
        &self,
        projection: &str,
        aggregate_type: &str,
        aggregate_id: uuid::Uuid,
        event_sequence: i64,
        error: &str,
    ) -> Result<u32, DomainError>;

    async fn failure_count(&self, projection: &str) -> Result<usize, DomainError>;
}

#[derive(Default)]
struct InMemoryBookmarkInner {
    positions: HashMap<String, Position>,
}

/// In-memory [`Bookmark`], used for tests and as the reference implementation
/// the Postgres-backed `projection_state` table generalizes (spec.md §6).
#[derive(Clone, Default)]
pub struct InMemoryBookmark {
    inner: Arc<Mutex<InMemoryBookmarkInner>>,
}

#[async_trait]
impl Bookmark for InMemoryBookmark {
    async fn last_position(&self, projection: &str) -> Result<Position, DomainError> {
        Ok(*self.inner.lock().await.positions.get(projection).unwrap_or(&0))
    }

    async fn advance(&self, projection: &str, position: Position) -> Result<(), DomainError> {
        self.inner.lock().await.positions.insert(projection.to_string(), position);
        Ok(())
    }

    async fn reset(&self, projection: &str) -> Result<(), DomainError> {
        self.inner.lock().await.positions.remove(projection);
        Ok(())
    }
}

#[derive(Clone)]
struct FailureRecord {
    failure_count: u32,
    last_error: String,
    last_failed_at: DateTime<Utc>,
}

#[derive(Default)]
struct InMemoryFailedEventsInner {
    records: HashMap<(String, String, uuid::Uuid, i64), FailureRecord>,
}

/// In-memory [`FailedEventsStore`], mirroring the `failed_events` table layout (spec.md §6).
#[derive(Clone, Default)]
pub struct InMemoryFailedEvents {
    inner: Arc<Mutex<InMemoryFailedEventsInner>>,
}

#[async_trait]
impl FailedEventsStore for InMemoryFailedEvents {
    async fn record_failure(
        &self,
        projection: &str,
        aggregate_type: &str,
        aggregate_id: uuid::Uuid,
        event_sequence: i64,
        error: &str,
    ) -> Result<u32, DomainError> {
        let mut inner = self.inner.lock().await;
        let key = (projection.to_string(), aggregate_type.to_string(), aggregate_id, event_sequence);
        let entry = inner.records.entry(key).or_insert(FailureRecord {
            failure_count: 0,
            last_error: String::new(),
            last_failed_at: Utc::now(),
        });
        entry.failure_count += 1;
        entry.last_error = error.to_string();
        entry.last_failed_at = Utc::now();
        Ok(entry.failure_count)
    }

    async fn failure_count(&self, projection: &str) -> Result<usize, DomainError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.keys().filter(|(p, ..)| p == projection).count())
    }
}

/// Drives a set of [`Projection`]s over an [`EventStore`]'s log.
///
/// Each call to [`Self::run_once`] advances every registered projection as
/// far as the currently-available log allows, recording failures instead of
/// stopping the whole engine (spec.md §4.3, §5). A long-running deployment
/// calls `run_once` on a timer or in a loop with a short sleep between empty
/// batches; that scheduling loop is left to the caller (out of scope per
/// spec.md §1, "container orchestration files").
pub struct ProjectionEngine<S: EventStore> {
    store: Arc<S>,
    bookmark: Arc<dyn Bookmark>,
    failed_events: Arc<dyn FailedEventsStore>,
    projections: Vec<Arc<dyn Projection>>,
    /// `failure_count` at or above this threshold escalates (spec.md §4.3);
    /// this engine surfaces escalation as a returned flag rather than paging
    /// anyone directly, since alerting is an external collaborator.
    pub escalation_threshold: u32,
}

/// Per-projection outcome of one [`ProjectionEngine::run_once`] pass.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub projection: &'static str,
    pub applied: usize,
    pub failed: usize,
    pub escalated: bool,
}

impl<S: EventStore> ProjectionEngine<S> {
    pub fn new(store: Arc<S>, bookmark: Arc<dyn Bookmark>, failed_events: Arc<dyn FailedEventsStore>) -> Self {
        Self {
            store,
            bookmark,
            failed_events,
            projections: Vec::new(),
            escalation_threshold: 10,
        }
    }

    pub fn register(&mut self, projection: Arc<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Names of every registered projection, in registration order.
    pub fn projection_names(&self) -> Vec<&'static str> {
        self.projections.iter().map(|p| p.name()).collect()
    }

    /// Runs every registered projection forward by up to `batch_size` events each.
    #[tracing::instrument(skip_all, fields(batch_size), err)]
    pub async fn run_once(&self, batch_size: u32) -> Result<Vec<RunReport>, DomainError> {
        let mut reports = Vec::with_capacity(self.projections.len());

        for projection in &self.projections {
            let span = tracing::debug_span!("iam_core.projection.run_once", projection = projection.name());
            let _e = span.enter();

            let last_position = self.bookmark.last_position(projection.name()).await?;
            let events = self.store.events_after_position(last_position, batch_size).await?;

            let relevant: Vec<&Event> = events
                .iter()
                .filter(|e| projection.event_types().contains(&e.event_type.as_str()))
                .collect();

            let mut applied = 0;
            let mut failed = 0;
            let mut escalated = false;
            let mut highest_position = last_position;

            for event in &events {
                if relevant.iter().any(|e| e.position == event.position) {
                    match projection.apply(event).await {
                        Ok(()) => applied += 1,
                        Err(err) => {
                            failed += 1;
                            tracing::error!(
                                projection = projection.name(),
                                aggregate_id = %event.aggregate_id,
                                event_sequence = event.sequence,
                                error = %err,
                                "projection failed to apply event"
                            );
                            let count = self
                                .failed_events
                                .record_failure(
                                    projection.name(),
                                    &event.aggregate_type,
                                    event.aggregate_id,
                                    event.sequence,
                                    &err.message,
                                )
                                .await?;
                            if count >= self.escalation_threshold {
                                escalated = true;
                            }
                        }
                    }
                }
                // Position advances for every event the engine has seen for this
                // projection's window, not only the ones it understood — a
                // projection never observes an event whose predecessor (by
                // position) has not been applied or explicitly recorded as
                // failed (spec.md §4.3 "Ordering guarantees").
                highest_position = event.position;
            }

            if highest_position != last_position {
                self.bookmark.advance(projection.name(), highest_position).await?;
            }

            reports.push(RunReport { projection: projection.name(), applied, failed, escalated });
        }

        Ok(reports)
    }

    /// Clears a projection's read model and bookmark, then replays it from the beginning (spec.md §4.3 "Rebuild").
    #[tracing::instrument(skip_all, fields(projection = projection_name, batch_size), err)]
    pub async fn rebuild(&self, projection_name: &str, batch_size: u32) -> Result<RunReport, DomainError> {
        let projection = self
            .projections
            .iter()
            .find(|p| p.name() == projection_name)
            .ok_or_else(|| DomainError::not_found("PROJECTION_NOT_FOUND", projection_name.to_string()))?;

        projection.clear().await?;
        self.bookmark.reset(projection_name).await?;

        let mut total = RunReport { projection: projection.name(), applied: 0, failed: 0, escalated: false };
        loop {
            let last_position = self.bookmark.last_position(projection_name).await?;
            let events = self.store.events_after_position(last_position, batch_size).await?;
            if events.is_empty() {
                break;
            }

            let mut highest_position = last_position;
            for event in &events {
                if projection.event_types().contains(&event.event_type.as_str()) {
                    match projection.apply(event).await {
                        Ok(()) => total.applied += 1,
                        Err(err) => {
                            total.failed += 1;
                            tracing::error!(
                                projection = projection_name,
                                aggregate_id = %event.aggregate_id,
                                event_sequence = event.sequence,
                                error = %err,
                                "projection failed to apply event during rebuild"
                            );
                            let count = self
                                .failed_events
                                .record_failure(projection_name, &event.aggregate_type, event.aggregate_id, event.sequence, &err.message)
                                .await?;
                            if count >= self.escalation_threshold {
                                total.escalated = true;
                            }
                        }
                    }
                }
                highest_position = event.position;
            }
            self.bookmark.advance(projection_name, highest_position).await?;

            if events.len() < batch_size as usize {
                break;
            }
        }

        Ok(total)
    }
}
