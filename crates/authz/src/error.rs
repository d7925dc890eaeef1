use thiserror::Error;

use gatehouse_core::ValidationError;

use crate::config::ConfigError;
use crate::resource::RegistryError;

/// Errors returned at the engine's API boundary.
///
/// Grant-store and cache failures never appear here: they turn into
/// decisions (per check mode) or cache misses respectively.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("engine is missing its {0}")]
    Incomplete(&'static str),
}
