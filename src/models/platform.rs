//! Social platform identifiers
//!
//! The persisted and wire representation of a platform is its lowercase slug.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Social platforms an account can be linked from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    LinkedIn,
    Instagram,
    Facebook,
    YouTube,
}

impl Platform {
    /// All supported platforms, in display order
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::LinkedIn,
        Platform::Instagram,
        Platform::Facebook,
        Platform::YouTube,
    ];

    /// Lowercase slug used in storage, URLs and config keys
    pub fn slug(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::LinkedIn => "linkedin",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::YouTube => "youtube",
        }
    }

    /// Whether the platform supports the OAuth 1.0a secondary credential set
    pub fn supports_oauth1(&self) -> bool {
        matches!(self, Platform::Twitter)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Error returned when parsing an unknown platform slug
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{0}'")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::LinkedIn),
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            "youtube" => Ok(Platform::YouTube),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}
