//! `gatehouse-authz`: capability and data-scope decisions.
//!
//! For a principal, a resource and an action the [`DecisionEngine`] answers
//! whether access is granted and, if so, which slice of the data the
//! principal reaches ([`DataScope`]). Decisions are cached per grant version,
//! invalidated from the grant store's mutation stream, and reported to an
//! [`AuditSink`].
//!
//! Transport, persistence and identity are out of scope: the grant store is a
//! trait ([`GrantStore`]) and the principal is handed in already built.
//!
//! [`DataScope`]: gatehouse_core::DataScope

pub mod audit;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod grant;
pub mod invalidator;
pub mod menu;
pub mod principal;
pub mod resource;
pub mod scope;
pub mod stats;
pub mod store;

pub use audit::{
    AuditDecision, AuditError, AuditEvent, AuditEventType, AuditSink, InMemoryAuditSink,
    NullAuditSink, TracingAuditSink,
};
pub use batch::{ConditionOutcome, EvaluationRequest, LogicOperator};
pub use cache::{
    CacheEntry, CacheError, CacheKey, CacheLookup, CacheStats, DecisionCache, GrantVersion,
    InMemoryDecisionCache,
};
pub use config::{CheckMode, ConfigError, EngineConfig};
pub use context::EvaluationContext;
pub use decision::{Decision, DecisionReason};
pub use engine::{DecisionEngine, DecisionEngineBuilder};
pub use error::AuthzError;
pub use grant::{Effect, Grant, GrantSource};
pub use invalidator::{CacheInvalidator, InvalidatorHandle, InvalidatorStats};
pub use menu::{MenuGate, NavigationNode, NodeKind};
pub use principal::{Principal, RoleCode};
pub use resource::{RegistryError, Resource, ResourceCategory, ResourceRegistry};
pub use scope::{ScopeError, ScopeResolution};
pub use stats::{StatsSnapshot, ValidationStats};
pub use store::{GrantStore, GrantStoreError, InMemoryGrantStore};
