//! Player Controller configuration.
//!
//! Configuration is loaded from environment variables. The authorization rule
//! is only reported as present or absent in Debug output.

use crate::scheduler::AuthorizationPolicy;

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default client signaling (WebSocket) bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:8443";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default instance ID prefix.
pub const DEFAULT_PC_ID_PREFIX: &str = "pc";

/// One media server and its optional load ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub uri: String,
    /// `None` means unlimited.
    pub capacity: Option<usize>,
}

/// Player Controller configuration.
#[derive(Clone)]
pub struct Config {
    /// Media servers in pool order (`PC_KMS_URIS`).
    pub nodes: Vec<NodeConfig>,

    /// Authorization rule, if any (`PC_AUTH_REGEX`). Already validated.
    pub auth_pattern: Option<String>,

    /// Client WebSocket bind address (default: "0.0.0.0:8443").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance.
    pub pc_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("nodes", &self.nodes)
            .field(
                "auth_pattern",
                &self.auth_pattern.as_ref().map(|_| "[CONFIGURED]"),
            )
            .field("signaling_bind_address", &self.signaling_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("pc_id", &self.pc_id)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_limit(name: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw:?}: {e}")))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let uris: Vec<String> = vars
            .get("PC_KMS_URIS")
            .ok_or_else(|| ConfigError::MissingEnvVar("PC_KMS_URIS".to_string()))?
            .split(',')
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(str::to_string)
            .collect();
        if uris.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PC_KMS_URIS must name at least one media server".to_string(),
            ));
        }

        let default_limit = vars
            .get("PC_KMS_LOAD_LIMIT")
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_limit("PC_KMS_LOAD_LIMIT", raw))
            .transpose()?;

        // Per-node ceilings line up with PC_KMS_URIS; a blank entry keeps the default.
        let mut limits = vec![default_limit; uris.len()];
        if let Some(raw) = vars.get("PC_KMS_LOAD_LIMITS") {
            let entries: Vec<&str> = raw.split(',').collect();
            if entries.len() > uris.len() {
                return Err(ConfigError::InvalidValue(format!(
                    "PC_KMS_LOAD_LIMITS has {} entries for {} media servers",
                    entries.len(),
                    uris.len()
                )));
            }
            for (slot, entry) in limits.iter_mut().zip(entries) {
                if !entry.trim().is_empty() {
                    *slot = Some(parse_limit("PC_KMS_LOAD_LIMITS", entry)?);
                }
            }
        }

        let nodes = uris
            .into_iter()
            .zip(limits)
            .map(|(uri, capacity)| NodeConfig { uri, capacity })
            .collect();

        let auth_pattern = vars
            .get("PC_AUTH_REGEX")
            .map(|raw| raw.trim().to_string())
            .filter(|pattern| !pattern.is_empty());
        if let Some(pattern) = &auth_pattern {
            AuthorizationPolicy::from_pattern(pattern)
                .map_err(|e| ConfigError::InvalidValue(format!("PC_AUTH_REGEX: {e}")))?;
        }

        let signaling_bind_address = vars
            .get("PC_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("PC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let pc_id = vars.get("PC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_PC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            nodes,
            auth_pattern,
            signaling_bind_address,
            health_bind_address,
            pc_id,
        })
    }

    /// Build the admission policy from `auth_pattern`.
    pub fn authorization_policy(&self) -> Result<AuthorizationPolicy, ConfigError> {
        match &self.auth_pattern {
            Some(pattern) => AuthorizationPolicy::from_pattern(pattern)
                .map_err(|e| ConfigError::InvalidValue(format!("PC_AUTH_REGEX: {e}"))),
            None => Ok(AuthorizationPolicy::allow_all()),
        }
    }
}
