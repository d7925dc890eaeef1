//! Grant store boundary.
//!
//! The store owns grant persistence and role membership; the engine only reads
//! from it and listens to its mutation stream. Implementations live outside
//! this crate apart from the in-memory one used by tests and the CLI.

pub mod in_memory;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use gatehouse_core::ResourceCode;
use gatehouse_events::{GrantMutation, Subscription};

use crate::grant::Grant;
use crate::principal::Principal;

pub use in_memory::InMemoryGrantStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GrantStoreError {
    #[error("grant store unavailable: {0}")]
    Unavailable(String),

    #[error("grant store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("grant store backend error: {0}")]
    Backend(String),
}

/// Read side of the grant store.
#[async_trait::async_trait]
pub trait GrantStore: Send + Sync {
    /// Role-derived (and any store-held direct) grants of `principal` whose
    /// pattern addresses `resource`. Direct grants carried on the
    /// [`Principal`] itself are merged by the engine, not here.
    async fn fetch_grants(
        &self,
        principal: &Principal,
        resource: &ResourceCode,
    ) -> Result<Vec<Grant>, GrantStoreError>;

    /// Whether [`GrantStore::fetch_grants_bulk`] is a single round trip.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Grants for several resources at once.
    ///
    /// The default makes one call per resource; stores that can do better
    /// override it and return `true` from [`GrantStore::supports_bulk`].
    async fn fetch_grants_bulk(
        &self,
        principal: &Principal,
        resources: &[ResourceCode],
    ) -> Result<HashMap<ResourceCode, Vec<Grant>>, GrantStoreError> {
        let mut out = HashMap::with_capacity(resources.len());
        for resource in resources {
            let grants = self.fetch_grants(principal, resource).await?;
            out.insert(resource.clone(), grants);
        }
        Ok(out)
    }

    /// Stream of mutations, starting from the moment of subscription.
    fn subscribe(&self) -> Subscription<GrantMutation>;
}
