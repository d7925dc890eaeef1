//! Resource registry: the static catalog of addressable resources.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatehouse_core::{ResourceCode, SecurityLevel};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Access,
    Attendance,
    Consumption,
    Visitor,
    Device,
    Area,
    System,
    Report,
    #[serde(other)]
    Other,
}

/// A protected capability domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub code: ResourceCode,
    pub category: ResourceCategory,
    /// Principals below this level are refused whatever their grants say.
    #[serde(default)]
    pub min_level: SecurityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Resource {
    pub fn new(code: ResourceCode, category: ResourceCategory, min_level: SecurityLevel) -> Self {
        Self {
            code,
            category,
            min_level,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("resource '{0}' registered twice")]
    Duplicate(ResourceCode),

    #[error("failed to parse resource catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Loaded once at startup; read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<ResourceCode, Resource>,
}

impl ResourceRegistry {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for resource in resources {
            if map.contains_key(&resource.code) {
                return Err(RegistryError::Duplicate(resource.code));
            }
            map.insert(resource.code.clone(), resource);
        }
        Ok(Self { resources: map })
    }

    /// Parse a JSON array of [`Resource`] records.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let resources: Vec<Resource> = serde_json::from_str(json)?;
        Self::new(resources)
    }

    pub fn get(&self, code: &ResourceCode) -> Option<&Resource> {
        self.resources.get(code)
    }

    pub fn contains(&self, code: &ResourceCode) -> bool {
        self.resources.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn by_category(&self, category: ResourceCategory) -> impl Iterator<Item = &Resource> {
        self.resources.values().filter(move |r| r.category == category)
    }
}
