//! `gatehouse-core`: shared authorization vocabulary.
//!
//! Plain value types with no IO: identifiers, the closed `Action` set, security
//! levels, data scopes and resource codes. Everything that arrives as a string
//! is parsed here, once, at the boundary.

pub mod action;
pub mod error;
pub mod id;
pub mod level;
pub mod permission_code;
pub mod resource_code;
pub mod scope;

pub use action::Action;
pub use error::{ValidationError, ValidationResult};
pub use id::{GrantId, PrincipalId};
pub use level::SecurityLevel;
pub use permission_code::PermissionCode;
pub use resource_code::{ResourceCode, ResourcePattern};
pub use scope::{DataScope, ScopeParams};
