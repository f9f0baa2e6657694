//! Crate-level integration coverage for the six concrete scenarios.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use iam_core::aggregates::org::{Org, OrgCommand};
use iam_core::aggregates::user_grant::{UserGrant, UserGrantCommand};
use iam_core::cache::Cache;
use iam_core::error::Status;
use iam_core::manager::AggregateRepository;
use iam_core::oidc::jar::{validate_request_jwt, JarConfig};
use iam_core::projection::{FailedEventsStore, InMemoryBookmark, InMemoryFailedEvents, Projection, ProjectionEngine};
use iam_core::query::model::LoginPolicyRow;
use iam_core::query::store::{Tables, UserGrantProjection};
use iam_core::query::QueryLayer;
use iam_core::store::memory::MemoryEventStore;
use iam_core::store::EventStore;
use iam_core::types::{InstanceId, ResourceOwner};
use iam_core::{Aggregate, EventFilter};

// 1. Concurrency conflict: a second append at the same expected sequence loses.
#[tokio::test]
async fn concurrency_conflict_maps_to_already_exists() {
    let store = Arc::new(MemoryEventStore::new());
    let repo: AggregateRepository<Org, MemoryEventStore> = AggregateRepository::new(store.clone());
    let instance = InstanceId(Uuid::new_v4());
    let org_id = Uuid::new_v4();

    repo.handle_command(instance, ResourceOwner(org_id), org_id, None, OrgCommand::Create { name: "acme".to_string() })
        .await
        .unwrap()
        .unwrap();

    // The aggregate is at sequence 1; a writer holding a stale read (still at
    // sequence 0) loses the race.
    let current = repo.load(instance, org_id).await.unwrap().unwrap();
    assert_eq!(current.sequence_number(), 1);

    let mut payloads = Org::handle_command(current.inner(), OrgCommand::Rename { name: "other".to_string() }).unwrap();
    let events = vec![iam_core::NewEvent {
        aggregate_type: Org::NAME.to_string(),
        aggregate_id: org_id,
        event_type: "org.renamed".to_string(),
        editor: None,
        resource_owner: ResourceOwner(org_id),
        instance_id: instance,
        payload: payloads.remove(0),
    }];

    let err = store.append(events, Some(0)).await.unwrap_err();
    assert_eq!(err.code, "CONCURRENCY_CONFLICT");
    assert_eq!(err.status(), Status::AlreadyExists);
}

// 2. Policy fallback: org has no policy, instance default applies.
#[test]
fn policy_falls_back_to_instance_default() {
    let tables = Arc::new(Tables::default());
    let query = QueryLayer::new(tables);
    let instance = InstanceId(Uuid::new_v4());
    let org_id = Uuid::new_v4();

    query.set_login_policy(LoginPolicyRow {
        instance_id: instance,
        org_id: None,
        allow_username_password: true,
        allow_registration: true,
        allow_external_idp: false,
        force_mfa: true,
        force_mfa_local_only: false,
        second_factors: vec![],
        multi_factors: vec![],
        linked_idps: vec![],
    });

    let active = query.get_active_login_policy(instance, org_id).unwrap();
    assert!(active.is_default);
    assert!(!active.is_org_policy);
    assert!(active.policy.force_mfa);
}

// 3. JAR validation: valid request extracts parameters; tampering is rejected with the right code.
#[test]
fn jar_validation_extracts_and_rejects_per_spec_example() {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;

    let now = Utc::now();
    let config = JarConfig {
        expected_client_id: "c1".to_string(),
        expected_audience: "https://idp/".to_string(),
        max_age: 3600,
        require_signature: false,
    };

    let make_jwt = |claims: &serde_json::Value| {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.")
    };

    let valid_claims = json!({
        "iss": "c1",
        "aud": ["https://idp/"],
        "iat": (now - chrono::Duration::seconds(100)).timestamp(),
        "response_type": "code",
        "redirect_uri": "https://app/cb",
    });
    let request = validate_request_jwt(&make_jwt(&valid_claims), &config, None, now).unwrap();
    assert_eq!(request.response_type, "code");
    assert_eq!(request.redirect_uri, "https://app/cb");

    let mut wrong_issuer = valid_claims.clone();
    wrong_issuer["iss"] = json!("c2");
    let err = validate_request_jwt(&make_jwt(&wrong_issuer), &config, None, now).unwrap_err();
    assert_eq!(err.code, "JAR-004");

    let mut missing_response_type = valid_claims;
    missing_response_type.as_object_mut().unwrap().remove("response_type");
    let err = validate_request_jwt(&make_jwt(&missing_response_type), &config, None, now).unwrap_err();
    assert_eq!(err.code, "JAR-011");
}

// 4. User-grant authorization: role membership determines hasRole.
#[tokio::test]
async fn user_grant_authorization_checks_role_membership() {
    let store = Arc::new(MemoryEventStore::new());
    let tables = Arc::new(Tables::default());
    let user_id = Uuid::new_v4();
    let project_id = Uuid::new_v4();
    let instance = InstanceId(Uuid::new_v4());

    let repo: AggregateRepository<UserGrant, MemoryEventStore> = AggregateRepository::new(store.clone());
    let grant_id = Uuid::new_v4();
    repo.handle_command(
        instance,
        ResourceOwner(user_id),
        grant_id,
        None,
        UserGrantCommand::Add { project_id, project_grant_id: None, roles: vec!["admin".to_string(), "viewer".to_string()] },
    )
    .await
    .unwrap()
    .unwrap();

    let events = store.query(&EventFilter::new().with_aggregate(UserGrant::NAME, grant_id)).await.unwrap();
    let projection = UserGrantProjection { tables: tables.clone() };
    for event in &events {
        projection.apply(event).await.unwrap();
    }

    let query = QueryLayer::new(tables);
    let admin_check = query.check_user_grant(instance, user_id, project_id, Some("admin"));
    assert!(admin_check.exists);
    assert!(admin_check.has_role);
    assert_eq!(admin_check.roles, vec!["admin".to_string(), "viewer".to_string()]);

    let owner_check = query.check_user_grant(instance, user_id, project_id, Some("owner"));
    assert!(owner_check.exists);
    assert!(!owner_check.has_role);
}

// 5. Cache semantics: set with a 1s TTL, read it back, watch it expire.
#[tokio::test]
async fn cache_entry_expires_and_updates_stats() {
    let cache = Cache::new(Duration::from_secs(300));
    cache.set("k", serde_json::json!("v"), Some(Duration::from_secs(1)));

    assert_eq!(cache.get("k"), Some(serde_json::json!("v")));
    let ttl = cache.ttl("k");
    assert!((0..=1).contains(&ttl), "ttl was {ttl}");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.ttl("k"), -2);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

// 6. Projection idempotence: replaying the same batch twice yields the same state, no failures.
#[tokio::test]
async fn replaying_the_same_batch_twice_is_idempotent() {
    let store = Arc::new(MemoryEventStore::new());
    let repo: AggregateRepository<Org, MemoryEventStore> = AggregateRepository::new(store.clone());
    let instance = InstanceId(Uuid::new_v4());
    let org_id = Uuid::new_v4();

    repo.handle_command(instance, ResourceOwner(org_id), org_id, None, OrgCommand::Create { name: "acme".to_string() })
        .await
        .unwrap()
        .unwrap();
    repo.handle_command(instance, ResourceOwner(org_id), org_id, None, OrgCommand::Rename { name: "acme-2".to_string() })
        .await
        .unwrap()
        .unwrap();

    let tables = Arc::new(Tables::default());
    let projection: Arc<dyn Projection> = Arc::new(iam_core::query::store::OrgProjection { tables: tables.clone() });
    let bookmark = Arc::new(InMemoryBookmark::default());
    let failed_events = Arc::new(InMemoryFailedEvents::default());

    let mut engine = ProjectionEngine::new(store.clone(), bookmark.clone(), failed_events.clone());
    engine.register(projection.clone());

    let first_pass = engine.run_once(10).await.unwrap();
    assert_eq!(first_pass[0].applied, 2);
    assert_eq!(first_pass[0].failed, 0);

    let name_after_first = tables.orgs.read().unwrap().get(&(instance, org_id)).unwrap().name.clone();
    assert_eq!(name_after_first, "acme-2");

    let rebuilt = engine.rebuild("orgs", 10).await.unwrap();
    assert_eq!(rebuilt.applied, 2);
    assert_eq!(rebuilt.failed, 0);

    let name_after_rebuild = tables.orgs.read().unwrap().get(&(instance, org_id)).unwrap().name.clone();
    assert_eq!(name_after_rebuild, name_after_first);
    assert_eq!(failed_events.failure_count("orgs").await.unwrap(), 0);
}
