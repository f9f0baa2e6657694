//! DDL for the persisted state layout (spec.md §6).

/// Creates the append-only `events` table plus the index every tenant-scoped
/// replay relies on.
pub fn create_events_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS events
    (
        position BIGSERIAL PRIMARY KEY,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        sequence BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        payload JSONB NOT NULL,
        editor TEXT,
        resource_owner UUID NOT NULL,
        instance_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT events_aggregate_sequence_key UNIQUE (aggregate_type, aggregate_id, sequence)
    )
    "
}

pub fn create_events_instance_index() -> &'static str {
    "CREATE INDEX IF NOT EXISTS events_instance_aggregate_idx ON events (instance_id, aggregate_type, aggregate_id)"
}

/// Per-projection bookmark table: one row per `(projection, partition)`.
pub fn create_projection_state_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS projection_state
    (
        projection TEXT NOT NULL,
        partition TEXT NOT NULL,
        last_position BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (projection, partition)
    )
    "
}

pub fn create_failed_events_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS failed_events
    (
        projection TEXT NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        event_sequence BIGINT NOT NULL,
        failure_count INT NOT NULL DEFAULT 1,
        last_error TEXT NOT NULL,
        last_failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (projection, aggregate_type, aggregate_id, event_sequence)
    )
    "
}

/// The Postgres-backed read model the query layer (C4) serves from, one
/// table per projection named in `src/query/postgres.rs` (spec.md §6
/// `projections.<name>`).
pub fn create_orgs_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS projections_orgs
    (
        instance_id UUID NOT NULL,
        id UUID NOT NULL,
        name TEXT NOT NULL,
        state TEXT NOT NULL,
        primary_domain TEXT,
        sequence BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (instance_id, id)
    )
    "
}

pub fn create_org_domains_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS projections_org_domains
    (
        instance_id UUID NOT NULL,
        org_id UUID NOT NULL,
        domain TEXT NOT NULL,
        verified BOOLEAN NOT NULL,
        is_primary BOOLEAN NOT NULL,
        PRIMARY KEY (instance_id, org_id, domain)
    )
    "
}

pub fn create_users_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS projections_users
    (
        instance_id UUID NOT NULL,
        id UUID NOT NULL,
        resource_owner UUID NOT NULL,
        state TEXT NOT NULL,
        user_type TEXT NOT NULL,
        username TEXT NOT NULL,
        email_verified BOOLEAN NOT NULL,
        phone_verified BOOLEAN NOT NULL,
        PRIMARY KEY (instance_id, id)
    )
    "
}

pub fn create_user_grants_table() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS projections_user_grants
    (
        instance_id UUID NOT NULL,
        id UUID NOT NULL,
        user_id UUID NOT NULL,
        project_id UUID NOT NULL,
        project_grant_id UUID,
        roles TEXT[] NOT NULL,
        active BOOLEAN NOT NULL,
        PRIMARY KEY (instance_id, id)
    )
    "
}

/// Every statement required to bring a fresh database up to the schema this
/// crate expects, in dependency order.
pub fn all() -> Vec<&'static str> {
    vec![
        create_events_table(),
        create_events_instance_index(),
        create_projection_state_table(),
        create_failed_events_table(),
        create_orgs_table(),
        create_org_domains_table(),
        create_users_table(),
        create_user_grants_table(),
    ]
}
