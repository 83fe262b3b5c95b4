//! Configuration loading for the social accounts service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `SOCIAL_ACCOUNTS_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Platform;
use crate::platforms::ClientCredentials;

/// Prefix shared by every recognised environment variable
pub const ENV_PREFIX: &str = "SOCIAL_ACCOUNTS_";

const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `SOCIAL_ACCOUNTS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub twitter: PlatformClientConfig,
    #[serde(default)]
    pub linkedin: PlatformClientConfig,
    #[serde(default)]
    pub facebook: PlatformClientConfig,
    #[serde(default)]
    pub instagram: PlatformClientConfig,
    #[serde(default)]
    pub youtube: PlatformClientConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
}

/// OAuth client registration for one platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PlatformClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Override for the platform's token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

impl PlatformClientConfig {
    /// Both halves of the client registration, if configured
    pub fn credentials(&self) -> Option<ClientCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(ClientCredentials::new(id.clone(), secret.clone())),
            _ => None,
        }
    }

    fn redacted(&self) -> Self {
        Self {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.as_ref().map(|_| REDACTED.to_string()),
            token_url: self.token_url.clone(),
        }
    }
}

/// Token validation and refresh settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Remaining lifetime below which a token is refreshed (default: 300)
    #[serde(default = "default_token_safety_margin_seconds")]
    pub safety_margin_seconds: u64,

    /// Upper bound for one refresh round trip (default: 10)
    #[serde(default = "default_token_refresh_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl TokenRefreshConfig {
    /// Validate token refresh configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.safety_margin_seconds > 3600 {
            return Err(ConfigError::InvalidTokenSafetyMargin {
                value: self.safety_margin_seconds,
            });
        }

        if self.request_timeout_seconds == 0 || self.request_timeout_seconds > 120 {
            return Err(ConfigError::InvalidTokenRefreshTimeout {
                value: self.request_timeout_seconds,
            });
        }

        Ok(())
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            safety_margin_seconds: default_token_safety_margin_seconds(),
            request_timeout_seconds: default_token_refresh_timeout_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            twitter: PlatformClientConfig::default(),
            linkedin: PlatformClientConfig::default(),
            facebook: PlatformClientConfig::default(),
            instagram: PlatformClientConfig::default(),
            youtube: PlatformClientConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// OAuth client settings for `platform`
    pub fn platform_client(&self, platform: Platform) -> &PlatformClientConfig {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::LinkedIn => &self.linkedin,
            Platform::Facebook => &self.facebook,
            Platform::Instagram => &self.instagram,
            Platform::YouTube => &self.youtube,
        }
    }

    fn platform_client_mut(&mut self, platform: Platform) -> &mut PlatformClientConfig {
        match platform {
            Platform::Twitter => &mut self.twitter,
            Platform::LinkedIn => &mut self.linkedin,
            Platform::Facebook => &mut self.facebook,
            Platform::Instagram => &mut self.instagram,
            Platform::YouTube => &mut self.youtube,
        }
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec![REDACTED.to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(REDACTED.as_bytes().to_vec());
        }
        for platform in Platform::ALL {
            let redacted = config.platform_client(platform).redacted();
            *config.platform_client_mut(platform) = redacted;
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        for platform in Platform::ALL {
            if let Some(token_url) = &self.platform_client(platform).token_url {
                url::Url::parse(token_url).map_err(|source| ConfigError::InvalidTokenUrl {
                    platform,
                    value: token_url.clone(),
                    source,
                })?;
            }
        }

        self.token_refresh.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/social_accounts".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_token_safety_margin_seconds() -> u64 {
    crate::token_refresh::DEFAULT_SAFETY_MARGIN_SECONDS
}

fn default_token_refresh_timeout_seconds() -> u64 {
    crate::token_refresh::DEFAULT_REFRESH_TIMEOUT_SECONDS
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error(
        "no operator tokens configured; set SOCIAL_ACCOUNTS_OPERATOR_TOKEN or SOCIAL_ACCOUNTS_OPERATOR_TOKENS"
    )]
    MissingOperatorTokens,
    #[error("crypto key is missing; set SOCIAL_ACCOUNTS_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("invalid {platform} token url '{value}': {source}")]
    InvalidTokenUrl {
        platform: Platform,
        value: String,
        source: url::ParseError,
    },
    #[error("token safety margin must be between 0 and 3600 seconds, got {value}")]
    InvalidTokenSafetyMargin { value: u64 },
    #[error("token refresh timeout must be between 1 and 120 seconds, got {value}")]
    InvalidTokenRefreshTimeout { value: u64 },
    #[error("invalid value '{value}' for {key}")]
    InvalidNumber { key: String, value: String },
}

/// Loads configuration using layered `.env` files and `SOCIAL_ACCOUNTS_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads, validates and returns the configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Process environment wins over every file layer.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = non_empty(layered.remove("PROFILE")).unwrap_or(profile_hint);
        let api_bind_addr =
            non_empty(layered.remove("API_BIND_ADDR")).unwrap_or_else(default_api_bind_addr);
        let log_level = non_empty(layered.remove("LOG_LEVEL")).unwrap_or_else(default_log_level);
        let log_format =
            non_empty(layered.remove("LOG_FORMAT")).unwrap_or_else(default_log_format);
        let database_url =
            non_empty(layered.remove("DATABASE_URL")).unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        // Comma-separated list wins over the single-token form
        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = non_empty(layered.remove("OPERATOR_TOKEN")) {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match non_empty(layered.remove("CRYPTO_KEY")) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let token_refresh = TokenRefreshConfig {
            safety_margin_seconds: parse_strict(
                &mut layered,
                "TOKEN_SAFETY_MARGIN_SECONDS",
            )?
            .unwrap_or_else(default_token_safety_margin_seconds),
            request_timeout_seconds: parse_strict(
                &mut layered,
                "TOKEN_REFRESH_TIMEOUT_SECONDS",
            )?
            .unwrap_or_else(default_token_refresh_timeout_seconds),
        };

        let mut config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            crypto_key,
            token_refresh,
            ..Default::default()
        };

        for platform in Platform::ALL {
            let prefix = platform.slug().to_ascii_uppercase();
            *config.platform_client_mut(platform) = PlatformClientConfig {
                client_id: non_empty(layered.remove(&format!("{}_CLIENT_ID", prefix))),
                client_secret: non_empty(layered.remove(&format!("{}_CLIENT_SECRET", prefix))),
                token_url: non_empty(layered.remove(&format!("{}_TOKEN_URL", prefix))),
            };
        }

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{}PROFILE", ENV_PREFIX))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Numeric settings that bound security behaviour are rejected rather than defaulted
fn parse_strict(
    layered: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    match non_empty(layered.remove(key)) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                key: format!("{}{}", ENV_PREFIX, key),
                value,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            operator_tokens: vec!["op-token".to_string()],
            crypto_key: Some(vec![0u8; 32]),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_use_five_minute_margin() {
        let config = AppConfig::default();
        assert_eq!(config.token_refresh.safety_margin_seconds, 300);
        assert_eq!(config.token_refresh.request_timeout_seconds, 10);
    }

    #[test]
    fn missing_crypto_key_is_rejected() {
        let config = AppConfig {
            crypto_key: None,
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCryptoKey)
        ));
    }

    #[test]
    fn short_crypto_key_is_rejected() {
        let config = AppConfig {
            crypto_key: Some(vec![1u8; 16]),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCryptoKeyLength { length: 16 })
        ));
    }

    #[test]
    fn operator_tokens_are_required() {
        let config = AppConfig {
            operator_tokens: Vec::new(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOperatorTokens)
        ));
    }

    #[test]
    fn token_refresh_bounds_are_enforced() {
        let mut config = valid_config();
        config.token_refresh.safety_margin_seconds = 3601;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTokenSafetyMargin { value: 3601 })
        ));

        let mut config = valid_config();
        config.token_refresh.request_timeout_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTokenRefreshTimeout { value: 0 })
        ));

        let mut config = valid_config();
        config.token_refresh.safety_margin_seconds = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn token_url_overrides_must_parse() {
        let mut config = valid_config();
        config.linkedin.token_url = Some("not a url".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTokenUrl {
                platform: Platform::LinkedIn,
                ..
            })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let mut config = valid_config();
        config.twitter = PlatformClientConfig {
            client_id: Some("tw-client".into()),
            client_secret: Some("tw-very-secret".into()),
            token_url: None,
        };

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("op-token"));
        assert!(!json.contains("tw-very-secret"));
        assert!(json.contains("tw-client"));
    }

    #[test]
    fn credentials_need_both_halves() {
        let half = PlatformClientConfig {
            client_id: Some("id".into()),
            client_secret: None,
            token_url: None,
        };
        assert!(half.credentials().is_none());

        let full = PlatformClientConfig {
            client_secret: Some("secret".into()),
            ..half
        };
        assert_eq!(full.credentials().unwrap().client_id, "id");
    }
}
