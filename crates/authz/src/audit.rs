//! Audit event stream.
//!
//! Every evaluation and every cache invalidation produces one or more
//! [`AuditEvent`]s. Emission is fire-and-forget: a failing sink is logged and
//! otherwise ignored, it never changes a decision.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use gatehouse_core::{Action, PrincipalId, ResourceCode};
use gatehouse_events::Event;

use crate::decision::{Decision, DecisionReason};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    PermissionCheck,
    PermissionGranted,
    PermissionDenied,
    CacheCleared,
    CacheRefreshed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PermissionCheck => "PERMISSION_CHECK",
            AuditEventType::PermissionGranted => "PERMISSION_GRANTED",
            AuditEventType::PermissionDenied => "PERMISSION_DENIED",
            AuditEventType::CacheCleared => "CACHE_CLEARED",
            AuditEventType::CacheRefreshed => "CACHE_REFRESHED",
        }
    }
}

impl core::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a decision carried on audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DecisionReason>,
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    pub scope_warning: bool,
}

impl From<&Decision> for AuditDecision {
    fn from(decision: &Decision) -> Self {
        Self {
            allowed: decision.is_allowed(),
            reason: decision.reason(),
            scope_warning: decision.has_scope_warning(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_code: Option<ResourceCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<AuditDecision>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            principal_id: None,
            resource_code: None,
            action: None,
            decision: None,
            timestamp: Utc::now(),
        }
    }

    /// `PERMISSION_CHECK`, `PERMISSION_GRANTED` or `PERMISSION_DENIED` for one
    /// evaluation.
    pub fn for_decision(
        event_type: AuditEventType,
        principal_id: PrincipalId,
        resource: &ResourceCode,
        action: Action,
        decision: &Decision,
    ) -> Self {
        Self {
            principal_id: Some(principal_id),
            resource_code: Some(resource.clone()),
            action: Some(action),
            decision: Some(decision.into()),
            ..Self::new(event_type)
        }
    }

    /// `PERMISSION_GRANTED` or `PERMISSION_DENIED` depending on the outcome.
    pub fn outcome(
        principal_id: PrincipalId,
        resource: &ResourceCode,
        action: Action,
        decision: &Decision,
    ) -> Self {
        let event_type = if decision.is_allowed() {
            AuditEventType::PermissionGranted
        } else {
            AuditEventType::PermissionDenied
        };
        Self::for_decision(event_type, principal_id, resource, action, decision)
    }

    /// `CACHE_CLEARED`; `None` means the whole cache.
    pub fn cache_cleared(principal_id: Option<PrincipalId>) -> Self {
        Self {
            principal_id,
            ..Self::new(AuditEventType::CacheCleared)
        }
    }
}

impl Event for AuditEvent {
    fn event_type(&self) -> &'static str {
        self.event_type.as_str()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit sink state poisoned")]
    Poisoned,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync + core::fmt::Debug {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Send `event` to `sink`, logging instead of propagating a failure.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(err) = sink.record(&event) {
        warn!(
            event_type = %event.event_type,
            error = %err,
            "audit sink rejected event"
        );
    }
}

/// Writes each event as a structured `tracing` event under `gatehouse::audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let principal = event.principal_id.map(|p| p.to_string());
        let resource = event.resource_code.as_ref().map(|r| r.to_string());
        let action = event.action.map(|a| a.as_str());
        let allowed = event.decision.as_ref().map(|d| d.allowed);
        let reason = event
            .decision
            .as_ref()
            .and_then(|d| d.reason)
            .map(|r| r.as_str());

        info!(
            target: "gatehouse::audit",
            event_type = %event.event_type,
            principal_id = principal.as_deref(),
            resource_code = resource.as_deref(),
            action,
            allowed,
            reason,
            timestamp = %event.timestamp,
            "audit event"
        );
        Ok(())
    }
}

/// Keeps every event in memory. Intended for tests and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(event.clone());
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{DataScope, ScopeParams};

    #[derive(Debug)]
    struct Broken;

    impl AuditSink for Broken {
        fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn outcome_picks_event_type_from_decision() {
        let pid = PrincipalId::new();
        let code = ResourceCode::parse("visitor:record").unwrap();

        let granted = Decision::allow(DataScope::All, ScopeParams::new(), 0, Utc::now());
        let event = AuditEvent::outcome(pid, &code, Action::Read, &granted);
        assert_eq!(event.event_type, AuditEventType::PermissionGranted);

        let denied = Decision::deny(DecisionReason::Denied, 0, Utc::now());
        let event = AuditEvent::outcome(pid, &code, Action::Read, &denied);
        assert_eq!(event.event_type, AuditEventType::PermissionDenied);
        assert_eq!(event.decision.unwrap().reason, Some(DecisionReason::Denied));
    }

    #[test]
    fn emit_swallows_sink_failures() {
        emit(&Broken, AuditEvent::cache_cleared(None));
    }

    #[test]
    fn serializes_with_wire_names() {
        let event = AuditEvent::cache_cleared(None);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CACHE_CLEARED");
        assert!(json.get("principal_id").is_none());
    }

    #[test]
    fn in_memory_sink_counts_by_type() {
        let sink = InMemoryAuditSink::new();
        emit(&sink, AuditEvent::cache_cleared(None));
        emit(&sink, AuditEvent::new(AuditEventType::PermissionCheck));
        assert_eq!(sink.count(AuditEventType::CacheCleared), 1);
        assert_eq!(sink.events().len(), 2);
    }
}
