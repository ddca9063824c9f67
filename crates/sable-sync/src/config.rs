//! # Sync Configuration
//!
//! Configuration for the gateway conversation and replay behavior.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SABLE_GATEWAY_URL=https://fdms.example.gov/                        │
//! │     SABLE_GATEWAY_TIMEOUT_SECS=30                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/sable-fiscal/sync.toml (Linux)                           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [gateway]
//! base_url = "https://fdms.example.gov/"
//! timeout_secs = 30
//! # Base64 Ed25519 public key used to verify counter-signatures
//! verifying_key_b64 = "..."
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 500
//! max_backoff_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Connection settings for the tax-authority gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the gateway API.
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Base64 Ed25519 public key for counter-signature verification.
    /// When absent, only signature PRESENCE is enforced.
    pub verifying_key_b64: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            base_url: "https://localhost:8443/".to_string(),
            timeout_secs: 30,
            verifying_key_b64: None,
        }
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Backoff settings for transient gateway failures during replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per queue entry before replay gives up for this run.
    pub max_attempts: u32,

    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in seconds.
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_secs: 60,
        }
    }
}

// =============================================================================
// Sync Configuration
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub gateway: GatewayConfig,
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Loads configuration: file (if present) + env overrides + defaults.
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    SyncConfig::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as TOML.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }
        std::fs::write(path, toml).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Default per-user config file location.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "sable", "sable-fiscal")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    fn load_file(path: &Path) -> SyncResult<Self> {
        info!(path = %path.display(), "Loading configuration");
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
        toml::from_str(&raw).map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SABLE_GATEWAY_URL") {
            debug!("Gateway URL overridden from environment");
            self.gateway.base_url = url;
        }
        if let Ok(timeout) = std::env::var("SABLE_GATEWAY_TIMEOUT_SECS") {
            match timeout.parse() {
                Ok(secs) => self.gateway.timeout_secs = secs,
                Err(_) => warn!("Ignoring unparseable SABLE_GATEWAY_TIMEOUT_SECS"),
            }
        }
    }

    fn validate(&self) -> SyncResult<()> {
        Url::parse(&self.gateway.base_url)?;
        if self.gateway.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "gateway.timeout_secs must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let raw = r#"
            [gateway]
            base_url = "https://fdms.example.gov/"
            timeout_secs = 10

            [retry]
            max_attempts = 3
            initial_backoff_ms = 100
            max_backoff_secs = 5
        "#;
        let config: SyncConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.gateway.base_url, "https://fdms.example.gov/");
        assert_eq!(config.gateway.timeout_secs, 10);
        assert_eq!(config.retry.max_attempts, 3);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: SyncConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.retry.initial_backoff_ms, 100);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let raw = r#"
            [gateway]
            base_url = "https://fdms.example.gov/"
        "#;
        let config: SyncConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = SyncConfig {
            gateway: GatewayConfig {
                base_url: "not a url".to_string(),
                ..GatewayConfig::default()
            },
            retry: RetryConfig::default(),
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = SyncConfig {
            gateway: GatewayConfig::default(),
            retry: RetryConfig {
                max_attempts: 0,
                ..RetryConfig::default()
            },
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
