mod support;

use std::time::Duration;

use gatehouse_authz::{
    AuthzError, DecisionReason, EngineConfig, EvaluationContext, EvaluationRequest, Grant,
    InMemoryGrantStore, LogicOperator,
};
use gatehouse_core::{Action, DataScope, ResourcePattern, SecurityLevel, ValidationError};

use support::{code, harness, harness_with_store, principal};

fn mixed_requests() -> Vec<EvaluationRequest> {
    vec![
        EvaluationRequest::new(code("smart:device"), Action::Read),
        EvaluationRequest::new(code("smart:device"), Action::Delete),
        EvaluationRequest::new(code("consume:account"), Action::Read),
        EvaluationRequest::new(code("ops:unknown"), Action::Read),
        EvaluationRequest::new(code("smart:device"), Action::Read),
        EvaluationRequest::new(code("smart:area"), Action::Read)
            .with_context(EvaluationContext::new().with("area", ["a1"])),
        EvaluationRequest::new(code("visitor:record"), Action::Approve),
    ]
}

fn seed(store: &InMemoryGrantStore) {
    store.grant_role(
        "guard",
        Grant::allow(ResourcePattern::parse("smart:*").unwrap(), [Action::Read], DataScope::Dept),
    );
    store.grant_role(
        "guard",
        Grant::deny(code("smart:device").into(), [Action::Delete]),
    );
    store.grant_role(
        "guard",
        Grant::allow(code("visitor:record").into(), [Action::Approve], DataScope::Area),
    );
}

#[tokio::test]
async fn empty_batch_is_empty() {
    let h = harness(EngineConfig::default());
    let out = h
        .engine
        .evaluate_batch(&principal(SecurityLevel::Low), &[])
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_any_lookup() {
    let h = harness(EngineConfig::default().with_max_batch_size(3));
    let requests = vec![EvaluationRequest::new(code("smart:device"), Action::Read); 4];

    let err = h
        .engine
        .evaluate_batch(&principal(SecurityLevel::Low), &requests)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthzError::Validation(ValidationError::BatchTooLarge { requested: 4, limit: 3 })
    ));
    assert_eq!(h.store.fetch_count(), 0);
    assert_eq!(h.engine.cache_stats().misses, 0);
}

#[tokio::test]
async fn batch_matches_sequential_evaluation() {
    let batched = harness(EngineConfig::default());
    let sequential = harness(EngineConfig::default());
    seed(&batched.store);
    seed(&sequential.store);

    let alice = principal(SecurityLevel::Medium).with_role("guard");
    let requests = mixed_requests();

    let from_batch = batched.engine.evaluate_batch(&alice, &requests).await.unwrap();

    assert_eq!(from_batch.len(), requests.len());
    for (req, got) in requests.iter().zip(&from_batch) {
        let expected = sequential
            .engine
            .evaluate(&alice, &req.resource, req.action, &req.context)
            .await;
        assert!(
            got.same_outcome(&expected),
            "{} {}: batch {:?} vs sequential {:?}",
            req.resource,
            req.action,
            got,
            expected
        );
    }

    assert_eq!(from_batch[1].reason(), Some(DecisionReason::Denied));
    assert_eq!(from_batch[2].reason(), Some(DecisionReason::Insufficient));
    assert_eq!(from_batch[3].reason(), Some(DecisionReason::NotFound));
    assert_eq!(from_batch[0], from_batch[4]);
}

#[tokio::test]
async fn duplicates_and_cache_hits_skip_the_store() {
    let h = harness(EngineConfig::default());
    seed(&h.store);
    let alice = principal(SecurityLevel::Low).with_role("guard");

    let read = EvaluationRequest::new(code("smart:device"), Action::Read);
    h.engine
        .evaluate_batch(&alice, &[read.clone(), read.clone(), read.clone()])
        .await
        .unwrap();
    assert_eq!(h.store.fetch_count(), 1);

    let area = EvaluationRequest::new(code("smart:area"), Action::Read);
    h.engine.evaluate_batch(&alice, &[read, area]).await.unwrap();
    assert_eq!(h.store.fetch_count(), 2);
}

#[tokio::test]
async fn bulk_capable_store_is_called_once() {
    let h = harness_with_store(InMemoryGrantStore::new().with_bulk_support(), EngineConfig::default());
    seed(&h.store);
    let alice = principal(SecurityLevel::Low).with_role("guard");

    let out = h.engine.evaluate_batch(&alice, &mixed_requests()).await.unwrap();

    assert_eq!(out.len(), 7);
    assert_eq!(h.store.bulk_fetch_count(), 1);
    assert_eq!(h.store.fetch_count(), 0);
}

#[tokio::test]
async fn fetch_concurrency_is_bounded() {
    let h = harness(EngineConfig::default().with_batch_concurrency(4));
    h.store.set_latency(Duration::from_millis(20));
    let alice = principal(SecurityLevel::Low).with_direct_grant(Grant::allow(
        ResourcePattern::parse("bulk:*").unwrap(),
        [Action::Read],
        DataScope::All,
    ));

    let requests: Vec<EvaluationRequest> = (0..20)
        .map(|i| EvaluationRequest::new(code(&format!("bulk:r{i}")), Action::Read))
        .collect();
    let out = h.engine.evaluate_batch(&alice, &requests).await.unwrap();

    assert!(out.iter().all(|d| d.is_allowed()));
    assert_eq!(h.store.fetch_count(), 20);
    assert!(h.store.max_in_flight() <= 4);
    assert!(h.store.max_in_flight() >= 2);
}

#[tokio::test]
async fn dropping_a_batch_leaves_the_engine_consistent() {
    let h = harness(EngineConfig::default());
    h.store.set_latency(Duration::from_millis(200));
    let alice = principal(SecurityLevel::Low).with_direct_grant(Grant::allow(
        code("visitor:record").into(),
        [Action::Read],
        DataScope::Dept,
    ));
    let requests = [EvaluationRequest::new(code("visitor:record"), Action::Read)];

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), h.engine.evaluate_batch(&alice, &requests))
            .await;
    assert!(abandoned.is_err());
    assert_eq!(h.engine.cache_stats().entries, 0);

    h.store.set_latency(Duration::ZERO);
    let out = h.engine.evaluate_batch(&alice, &requests).await.unwrap();
    assert_eq!(out[0].effective_scope(), Some(DataScope::Dept));
    assert_eq!(h.engine.cache_stats().entries, 1);
}

#[tokio::test]
async fn preload_warms_the_cache() {
    let h = harness(EngineConfig::default().with_max_batch_size(5));
    let alice = principal(SecurityLevel::Low).with_direct_grant(Grant::allow(
        ResourcePattern::parse("bulk:*").unwrap(),
        [Action::Read],
        DataScope::All,
    ));
    let requests: Vec<EvaluationRequest> = (0..12)
        .map(|i| EvaluationRequest::new(code(&format!("bulk:r{i}")), Action::Read))
        .collect();

    assert_eq!(h.engine.preload(&alice, &requests).await.unwrap(), 12);
    let fetched = h.store.fetch_count();

    assert!(h.engine.can_render(&alice, &code("bulk:r7"), Action::Read).await);
    assert_eq!(h.store.fetch_count(), fetched);
}

#[tokio::test]
async fn conditions_combine_under_all_and_any() {
    let h = harness(EngineConfig::default());
    seed(&h.store);
    let alice = principal(SecurityLevel::Low).with_role("guard");

    let conditions = [
        EvaluationRequest::new(code("smart:device"), Action::Read),
        EvaluationRequest::new(code("smart:device"), Action::Delete),
    ];

    let all = h
        .engine
        .evaluate_conditions(&alice, &conditions, LogicOperator::All)
        .await
        .unwrap();
    assert!(!all.satisfied);
    assert_eq!(all.decisions.len(), 2);
    assert_eq!(all.decisions[1].reason(), Some(DecisionReason::Denied));

    let any = h
        .engine
        .evaluate_conditions(&alice, &conditions, LogicOperator::Any)
        .await
        .unwrap();
    assert!(any.satisfied);
    assert_eq!(h.store.fetch_count(), 1);

    let granted_only = &conditions[..1];
    assert!(
        h.engine
            .evaluate_conditions(&alice, granted_only, LogicOperator::All)
            .await
            .unwrap()
            .satisfied
    );
}

#[tokio::test]
async fn empty_conditions_are_rejected() {
    let h = harness(EngineConfig::default());
    let err = h
        .engine
        .evaluate_conditions(&principal(SecurityLevel::Low), &[], LogicOperator::Any)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Validation(ValidationError::EmptyConditions)));
    assert_eq!(h.store.fetch_count(), 0);
}
