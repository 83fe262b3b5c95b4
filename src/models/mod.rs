//! # Data Models
//!
//! Persistence entities and shared value types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod credential;
pub mod platform;

pub use credential::Entity as PlatformCredential;
pub use platform::{Platform, UnknownPlatform};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "social-accounts".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
