//! Group call service configuration.
//!
//! Configuration is loaded from environment variables. Everything has a
//! default; malformed values are rejected rather than silently replaced.

use crate::actors::RegistrySettings;
use crate::participant::CancelPolicy;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default signaling WebSocket bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default Kurento Media Server JSON-RPC URL.
pub const DEFAULT_KMS_URL: &str = "ws://localhost:8888/kurento";

/// Default number of join attempts against a room that is closing.
pub const DEFAULT_JOIN_RETRY_LIMIT: u32 = 3;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "groupcall";

/// Group call service configuration.
#[derive(Clone)]
pub struct Config {
    /// Signaling WebSocket bind address (default: "0.0.0.0:8443").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Kurento Media Server URL. May carry credentials, so it is redacted
    /// in Debug output.
    pub kms_url: String,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Release incoming endpoints when a subscription is cancelled.
    pub release_on_cancel: bool,

    /// Join attempts against a closing room before giving up (>= 1).
    pub join_retry_limit: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("signaling_bind_address", &self.signaling_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("kms_url", &"[REDACTED]")
            .field("instance_id", &self.instance_id)
            .field("release_on_cancel", &self.release_on_cancel)
            .field("join_retry_limit", &self.join_retry_limit)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = vars
            .get("GROUPCALL_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("GROUPCALL_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let kms_url = vars
            .get("GROUPCALL_KMS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KMS_URL.to_string());

        if !(kms_url.starts_with("ws://") || kms_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "GROUPCALL_KMS_URL must use ws:// or wss://".to_string(),
            ));
        }

        let release_on_cancel = match vars.get("GROUPCALL_RELEASE_ON_CANCEL") {
            Some(value) => parse_bool("GROUPCALL_RELEASE_ON_CANCEL", value)?,
            None => false,
        };

        let join_retry_limit = match vars.get("GROUPCALL_JOIN_RETRY_LIMIT") {
            Some(value) => value.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue(format!("GROUPCALL_JOIN_RETRY_LIMIT: {e}"))
            })?,
            None => DEFAULT_JOIN_RETRY_LIMIT,
        };

        if join_retry_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "GROUPCALL_JOIN_RETRY_LIMIT must be at least 1".to_string(),
            ));
        }

        let instance_id = vars
            .get("GROUPCALL_INSTANCE_ID")
            .cloned()
            .unwrap_or_else(|| {
                let uuid_suffix = uuid::Uuid::new_v4().to_string();
                let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
                format!("{DEFAULT_INSTANCE_ID_PREFIX}-{short_suffix}")
            });

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            kms_url,
            instance_id,
            release_on_cancel,
            join_retry_limit,
        })
    }

    /// Registry settings derived from this configuration.
    #[must_use]
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            cancel_policy: if self.release_on_cancel {
                CancelPolicy::Release
            } else {
                CancelPolicy::KeepAlive
            },
            join_retry_limit: self.join_retry_limit,
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue(format!(
            "{name}: expected a boolean, got '{other}'"
        ))),
    }
}
