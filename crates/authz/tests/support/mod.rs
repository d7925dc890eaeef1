#![allow(dead_code)]

use std::sync::Arc;

use gatehouse_authz::{
    DecisionEngine, EngineConfig, InMemoryAuditSink, InMemoryGrantStore, Principal, Resource,
    ResourceCategory, ResourceRegistry,
};
use gatehouse_core::{PrincipalId, ResourceCode, SecurityLevel};

pub struct Harness {
    pub engine: Arc<DecisionEngine>,
    pub store: Arc<InMemoryGrantStore>,
    pub audit: Arc<InMemoryAuditSink>,
}

pub fn code(s: &str) -> ResourceCode {
    ResourceCode::parse(s.to_string()).unwrap()
}

pub fn registry() -> ResourceRegistry {
    let mut resources = vec![
        Resource::new(code("smart:device"), ResourceCategory::Device, SecurityLevel::Low),
        Resource::new(code("smart:area"), ResourceCategory::Area, SecurityLevel::Low),
        Resource::new(code("smart:access:door"), ResourceCategory::Access, SecurityLevel::Medium),
        Resource::new(code("consume:account"), ResourceCategory::Consumption, SecurityLevel::High),
        Resource::new(code("visitor:record"), ResourceCategory::Visitor, SecurityLevel::Low),
        Resource::new(code("report:attendance"), ResourceCategory::Report, SecurityLevel::Low),
    ];
    for i in 0..24 {
        resources.push(Resource::new(
            code(&format!("bulk:r{i}")),
            ResourceCategory::Other,
            SecurityLevel::Low,
        ));
    }
    ResourceRegistry::new(resources).unwrap()
}

pub fn harness(config: EngineConfig) -> Harness {
    harness_with_store(InMemoryGrantStore::new(), config)
}

pub fn harness_with_store(store: InMemoryGrantStore, config: EngineConfig) -> Harness {
    let store = Arc::new(store);
    let audit = Arc::new(InMemoryAuditSink::new());
    let engine = DecisionEngine::builder()
        .registry(registry())
        .store(store.clone())
        .audit(audit.clone())
        .config(config)
        .build()
        .unwrap();
    Harness {
        engine: Arc::new(engine),
        store,
        audit,
    }
}

pub fn principal(level: SecurityLevel) -> Principal {
    Principal::new(PrincipalId::new(), level)
}
