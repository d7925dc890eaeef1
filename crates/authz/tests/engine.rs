mod support;

use std::time::Duration;

use chrono::Utc;
use gatehouse_authz::{
    AuditEventType, AuthzError, CheckMode, DecisionReason, EngineConfig, EvaluationContext, Grant,
    GrantStore, RoleCode,
};
use gatehouse_core::{
    Action, DataScope, ResourcePattern, ScopeParams, SecurityLevel, ValidationError,
};

use support::{code, harness, principal};

fn ctx() -> EvaluationContext {
    EvaluationContext::new()
}

#[tokio::test]
async fn role_and_direct_grants_widen_to_area() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");

    h.store.grant_role(
        "guard",
        Grant::allow(device.clone().into(), [Action::Read], DataScope::Dept),
    );
    let alice = principal(SecurityLevel::Medium)
        .with_role("guard")
        .with_direct_grant(Grant::allow(device.clone().into(), [Action::Read], DataScope::Area));

    let decision = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.effective_scope(), Some(DataScope::Area));
    assert_eq!(decision.reason(), None);
}

#[tokio::test]
async fn deny_beats_every_allow() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");

    h.store.grant_role(
        "guard",
        Grant::allow(device.clone().into(), [Action::Read], DataScope::Dept),
    );
    let alice = principal(SecurityLevel::Medium)
        .with_role("guard")
        .with_direct_grant(Grant::allow(device.clone().into(), [Action::Read], DataScope::Area));
    h.store
        .grant_direct(alice.id, Grant::deny(device.clone().into(), [Action::Read]));

    let decision = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), Some(DecisionReason::Denied));
    assert_eq!(decision.effective_scope(), None);
}

#[tokio::test]
async fn security_gate_precedes_wildcard_grant() {
    let h = harness(EngineConfig::default());
    let account = code("consume:account");

    let bob = principal(SecurityLevel::Medium).with_direct_grant(Grant::allow(
        ResourcePattern::Any,
        Action::ALL,
        DataScope::All,
    ));

    let decision = h.engine.evaluate(&bob, &account, Action::Read, &ctx()).await;
    assert_eq!(decision.reason(), Some(DecisionReason::Insufficient));
    assert_eq!(h.store.fetch_count(), 0);
    assert_eq!(h.engine.cache_stats().entries, 0);
}

#[tokio::test]
async fn unknown_resource_is_not_found_without_store_access() {
    let h = harness(EngineConfig::default());
    let alice = principal(SecurityLevel::Critical);

    let decision = h
        .engine
        .evaluate(&alice, &code("ops:firmware"), Action::Read, &ctx())
        .await;
    assert_eq!(decision.reason(), Some(DecisionReason::NotFound));
    assert_eq!(h.store.fetch_count(), 0);
}

#[tokio::test]
async fn expired_grants_report_expired() {
    let h = harness(EngineConfig::default());
    let visitor = code("visitor:record");
    let carol = principal(SecurityLevel::Low).with_direct_grant(
        Grant::allow(visitor.clone().into(), [Action::Read], DataScope::All)
            .expiring_at(Utc::now() - chrono::Duration::seconds(5)),
    );

    let decision = h.engine.evaluate(&carol, &visitor, Action::Read, &ctx()).await;
    assert_eq!(decision.reason(), Some(DecisionReason::Expired));
}

#[tokio::test]
async fn custom_scope_resolves_against_context() {
    let h = harness(EngineConfig::default());
    let area = code("smart:area");
    let dave = principal(SecurityLevel::Low).with_direct_grant(Grant::allow_custom(
        area.clone().into(),
        [Action::Read],
        ScopeParams::new().with("area", ["a1", "a2"]),
    ));

    let covered = ctx().with("area", ["a1", "a2", "a3"]);
    let decision = h.engine.evaluate(&dave, &area, Action::Read, &covered).await;
    assert_eq!(decision.effective_scope(), Some(DataScope::Custom));
    assert_eq!(decision.scope_params().ids("area").unwrap().len(), 2);

    let narrow = ctx().with("area", ["a1"]);
    let decision = h.engine.evaluate(&dave, &area, Action::Read, &narrow).await;
    assert_eq!(decision.reason(), Some(DecisionReason::InvalidScope));
}

#[tokio::test]
async fn repeated_evaluation_is_served_from_cache() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");
    h.store.grant_role(
        "guard",
        Grant::allow(device.clone().into(), [Action::Read], DataScope::Dept),
    );
    let alice = principal(SecurityLevel::Low).with_role("guard");

    let first = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    let fetches = h.store.fetch_count();
    for _ in 0..5 {
        let again = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
        assert_eq!(again, first);
    }

    assert_eq!(h.store.fetch_count(), fetches);
    assert_eq!(h.audit.count(AuditEventType::PermissionCheck), 5);
    assert_eq!(h.audit.count(AuditEventType::PermissionGranted), 1);
    assert_eq!(h.engine.stats().cache_hits, 5);
}

#[tokio::test]
async fn session_deny_grant_overrides_cached_allow() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");
    h.store.grant_role(
        "guard",
        Grant::allow(device.clone().into(), [Action::Read], DataScope::Dept),
    );
    let alice = principal(SecurityLevel::Medium)
        .with_role("guard")
        .with_direct_grant(Grant::allow(device.clone().into(), [Action::Read], DataScope::Area));

    let before = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert_eq!(before.effective_scope(), Some(DataScope::Area));

    let revoked = alice
        .clone()
        .with_direct_grant(Grant::deny(device.clone().into(), [Action::Read]));
    let after = h.engine.evaluate(&revoked, &device, Action::Read, &ctx()).await;
    assert!(!after.is_allowed());
    assert_eq!(after.reason(), Some(DecisionReason::Denied));

    let mut stripped = alice.clone();
    stripped.roles.clear();
    stripped.direct_grants.clear();
    let bare = h.engine.evaluate(&stripped, &device, Action::Read, &ctx()).await;
    assert_eq!(bare.reason(), Some(DecisionReason::NotFound));

    let again = h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert!(again.same_outcome(&before));
    assert_eq!(h.engine.stats().cache_hits, 1);
}

#[tokio::test]
async fn revocation_is_visible_within_ttl() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");
    let alice = principal(SecurityLevel::Low);
    let grant_id = h.store.grant_direct(
        alice.id,
        Grant::allow(device.clone().into(), [Action::Write], DataScope::SelfOnly),
    );

    let before = h.engine.evaluate(&alice, &device, Action::Write, &ctx()).await;
    assert!(before.is_allowed());

    // Apply the mutation the way the background worker would.
    let subscription = h.store.subscribe();
    assert!(h.store.revoke_direct(alice.id, grant_id));
    let mutation = subscription.try_recv().unwrap();
    h.engine.invalidator().apply(&mutation).unwrap();

    let after = h.engine.evaluate(&alice, &device, Action::Write, &ctx()).await;
    assert!(!after.is_allowed());
    assert_eq!(after.reason(), Some(DecisionReason::NotFound));
    assert!(after.version() > before.version());
    assert_eq!(h.audit.count(AuditEventType::CacheRefreshed), 1);
    assert_eq!(h.audit.count(AuditEventType::CacheCleared), 1);
}

#[tokio::test]
async fn background_invalidator_tracks_role_changes() {
    let h = harness(EngineConfig::default());
    let report = code("report:attendance");
    let guard = RoleCode::new("guard");
    let grant_id = h.store.grant_role(
        guard.clone(),
        Grant::allow(report.clone().into(), [Action::Export], DataScope::Dept),
    );
    let alice = principal(SecurityLevel::Low).with_role("guard");
    let handle = h.engine.start_invalidator();

    assert!(h.engine.evaluate(&alice, &report, Action::Export, &ctx()).await.is_allowed());

    assert!(h.store.revoke_role_grant(&guard, grant_id));
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while handle.stats().mutations_applied == 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let after = h.engine.evaluate(&alice, &report, Action::Export, &ctx()).await;
    assert_eq!(after.reason(), Some(DecisionReason::NotFound));
    handle.shutdown();
}

#[tokio::test]
async fn store_timeout_follows_check_mode() {
    let strict = harness(EngineConfig::default().with_check_timeout(Duration::from_millis(20)));
    strict.store.set_latency(Duration::from_millis(500));
    let alice = principal(SecurityLevel::Low);
    let device = code("smart:device");

    let decision = strict.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert!(!decision.is_allowed());
    assert_eq!(decision.reason(), Some(DecisionReason::Error));
    assert_eq!(strict.engine.cache_stats().entries, 0);

    let loose = harness(
        EngineConfig::default()
            .with_check_mode(CheckMode::Loose)
            .with_check_timeout(Duration::from_millis(20)),
    );
    loose.store.set_unavailable(true);

    let decision = loose.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    assert!(decision.is_allowed());
    assert_eq!(decision.reason(), Some(DecisionReason::Error));
    assert_eq!(decision.effective_scope(), Some(DataScope::SelfOnly));
    assert_eq!(loose.engine.cache_stats().entries, 0);
    assert_eq!(loose.engine.stats().store_errors, 1);
}

#[tokio::test]
async fn clear_cache_forces_recompute() {
    let h = harness(EngineConfig::default());
    let device = code("smart:device");
    let alice = principal(SecurityLevel::Low).with_direct_grant(Grant::allow(
        device.clone().into(),
        [Action::Read],
        DataScope::All,
    ));

    h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    h.engine.clear_cache(Some(alice.id));
    h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;
    h.engine.clear_cache(None);
    h.engine.evaluate(&alice, &device, Action::Read, &ctx()).await;

    assert_eq!(h.store.fetch_count(), 3);
    assert_eq!(h.audit.count(AuditEventType::CacheCleared), 2);
}

#[tokio::test]
async fn permission_code_strings_are_parsed_at_the_boundary() {
    let h = harness(EngineConfig::default());
    let alice = principal(SecurityLevel::Low).with_direct_grant(Grant::allow(
        ResourcePattern::parse("smart:*").unwrap(),
        [Action::Read],
        DataScope::Area,
    ));

    let decision = h
        .engine
        .evaluate_code(&alice, "smart:area:read", &ctx())
        .await
        .unwrap();
    assert!(decision.covers_scope(DataScope::Dept));
    assert!(!decision.covers_scope(DataScope::All));

    assert!(h.engine.evaluate_code(&alice, "smart:area:fly", &ctx()).await.is_err());
    assert!(h.engine.can_render(&alice, &code("smart:device"), Action::Read).await);
    assert!(!h.engine.can_render(&alice, &code("smart:device"), Action::Delete).await);
}

#[tokio::test]
async fn malformed_input_is_rejected_before_lookup() {
    let h = harness(EngineConfig::default());
    let alice = principal(SecurityLevel::Low);

    let err = h
        .engine
        .check(&alice, "Smart Device", "read", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthzError::Validation(ValidationError::MalformedResourceCode(_))
    ));

    let err = h
        .engine
        .check(&alice, "smart:device", "teleport", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Validation(ValidationError::UnknownAction(_))));

    assert_eq!(h.store.fetch_count(), 0);
    assert_eq!(h.engine.cache_stats().misses, 0);

    let ok = h.engine.check(&alice, "smart:device", "READ", &ctx()).await.unwrap();
    assert_eq!(ok.reason(), Some(DecisionReason::NotFound));
}
