//! JSON fixture: a whole deployment (resources, roles, principals, menu) in
//! one file, loaded into the in-memory grant store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde::Deserialize;

use gatehouse_authz::{
    AuditSink, CheckMode, DecisionEngine, EngineConfig, Grant, InMemoryGrantStore, NavigationNode, Principal,
    Resource, ResourceRegistry, RoleCode,
};

#[derive(Debug, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub roles: BTreeMap<RoleCode, Vec<Grant>>,
    #[serde(default)]
    pub principals: BTreeMap<String, Principal>,
    #[serde(default)]
    pub menu: Option<NavigationNode>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid fixture {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn principal(&self, name: &str) -> anyhow::Result<&Principal> {
        self.principals.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.principals.keys().map(String::as_str).collect();
            anyhow!("unknown principal '{name}' (known: {})", known.join(", "))
        })
    }

    /// The fixture's config if it has one, otherwise whatever `lookup` yields
    /// for the `GATEHOUSE_*` keys. `mode` overrides the check mode either way.
    pub fn resolve_config<F>(
        &self,
        lookup: F,
        mode: Option<CheckMode>,
    ) -> anyhow::Result<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match &self.config {
            Some(config) => config.clone(),
            None => EngineConfig::from_lookup(lookup).context("invalid GATEHOUSE_* configuration")?,
        };
        Ok(match mode {
            Some(mode) => config.with_check_mode(mode),
            None => config,
        })
    }

    /// Engine over a fresh in-memory store seeded with the fixture's roles.
    pub fn engine(
        &self,
        config: EngineConfig,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<DecisionEngine> {
        let registry = ResourceRegistry::new(self.resources.iter().cloned())?;

        let store = InMemoryGrantStore::new();
        for (role, grants) in &self.roles {
            for grant in grants {
                store.grant_role(role.clone(), grant.clone());
            }
        }

        Ok(DecisionEngine::builder()
            .registry(registry)
            .store(Arc::new(store))
            .audit(audit)
            .config(config)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_authz::{EvaluationContext, NullAuditSink};
    use gatehouse_core::{Action, ResourceCode};

    const CAMPUS: &str = include_str!("../fixtures/campus.json");

    #[test]
    fn bundled_fixture_parses() {
        let fixture = Fixture::parse(CAMPUS).unwrap();
        assert!(!fixture.resources.is_empty());
        assert!(fixture.principal("guard").is_ok());
        assert!(fixture.principal("nobody").is_err());
        assert!(fixture.menu.is_some());
    }

    #[tokio::test]
    async fn bundled_fixture_drives_the_engine() {
        let fixture = Fixture::parse(CAMPUS).unwrap();
        let config = fixture.resolve_config(|_| None, None).unwrap();
        let engine = fixture.engine(config, Arc::new(NullAuditSink)).unwrap();
        let guard = fixture.principal("guard").unwrap();

        let door = ResourceCode::parse("smart:access:door").unwrap();
        let decision = engine
            .evaluate(guard, &door, Action::Read, &EvaluationContext::new())
            .await;
        assert!(decision.is_allowed());

        let menu = engine
            .filter_menu(fixture.menu.as_ref().unwrap(), guard)
            .await
            .unwrap();
        assert!(!menu.children.is_empty());
    }

    fn bare() -> Fixture {
        let mut fixture = Fixture::parse(CAMPUS).unwrap();
        fixture.config = None;
        fixture
    }

    #[test]
    fn environment_fills_in_for_a_missing_config() {
        let env = |key: &str| match key {
            "GATEHOUSE_CHECK_MODE" => Some("loose".to_string()),
            "GATEHOUSE_CACHE_TTL_SECS" => Some("42".to_string()),
            _ => None,
        };

        let config = bare().resolve_config(env, None).unwrap();
        assert_eq!(config.check_mode, CheckMode::Loose);
        assert_eq!(config.cache_ttl, std::time::Duration::from_secs(42));

        let overridden = bare().resolve_config(env, Some(CheckMode::Strict)).unwrap();
        assert_eq!(overridden.check_mode, CheckMode::Strict);
        assert_eq!(overridden.cache_ttl, std::time::Duration::from_secs(42));
    }

    #[test]
    fn malformed_environment_is_an_error() {
        let env = |key: &str| (key == "GATEHOUSE_MAX_BATCH_SIZE").then(|| "lots".to_string());
        assert!(bare().resolve_config(env, Some(CheckMode::Loose)).is_err());
    }

    #[test]
    fn fixture_config_wins_over_environment() {
        let fixture = Fixture::parse(CAMPUS).unwrap();
        let expected = fixture.config.clone().unwrap();
        let env = |_: &str| Some("garbage".to_string());

        assert_eq!(fixture.resolve_config(env, None).unwrap(), expected);
    }
}
