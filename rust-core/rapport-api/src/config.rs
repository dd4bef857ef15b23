// SPDX-License-Identifier: PMPL-1.0-or-later
//! API server configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! | variable | meaning |
//! |---|---|
//! | `RAPPORT_HOST` | bind address |
//! | `RAPPORT_PORT` | bind port |
//! | `RAPPORT_POLICY_GENERATION` | `v1` or `v2` |
//! | `RAPPORT_API_KEYS` | `key:identity,key:identity` |
//! | `RAPPORT_BOOTSTRAP_ADMIN` | identity granted the first administrator entry |

use rapport_authz::{PolicyGeneration, RolloutError};
use rapport_repository::RepositoryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error(transparent)]
    PolicyGeneration(#[from] RolloutError),

    #[error("invalid API key binding '{0}', expected key:identity")]
    InvalidKeyBinding(String),
}

/// Maps one API key to the identity it authenticates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyBinding {
    #[serde(skip_serializing)]
    pub key: String,
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_keys: Vec<ApiKeyBinding>,
    pub bootstrap_admin: Option<String>,
    pub repository: RepositoryConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_keys: Vec::new(),
            bootstrap_admin: None,
            repository: RepositoryConfig::default(),
        }
    }
}

/// Parse `key:identity,key:identity`.
pub fn parse_key_bindings(spec: &str) -> Result<Vec<ApiKeyBinding>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once(':') {
            Some((key, identity)) if !key.trim().is_empty() && !identity.trim().is_empty() => {
                Ok(ApiKeyBinding {
                    key: key.trim().to_string(),
                    identity: identity.trim().to_string(),
                })
            }
            _ => Err(ConfigError::InvalidKeyBinding(pair.to_string())),
        })
        .collect()
}

impl ApiConfig {
    /// Defaults overridden by `RAPPORT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ApiConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup("RAPPORT_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("RAPPORT_PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(generation) = lookup("RAPPORT_POLICY_GENERATION") {
            config.repository.policy_generation = generation.parse::<PolicyGeneration>()?;
        }
        if let Some(keys) = lookup("RAPPORT_API_KEYS") {
            config.api_keys = parse_key_bindings(&keys)?;
        }
        if let Some(admin) = lookup("RAPPORT_BOOTSTRAP_ADMIN") {
            let admin = admin.trim();
            if !admin.is_empty() {
                config.bootstrap_admin = Some(admin.to_string());
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.api_keys.is_empty());
        assert_eq!(config.repository.policy_generation, PolicyGeneration::V2);
    }

    #[test]
    fn test_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("RAPPORT_PORT", "9090"),
            ("RAPPORT_POLICY_GENERATION", "v1"),
            ("RAPPORT_API_KEYS", "k1:alice, k2:root"),
            ("RAPPORT_BOOTSTRAP_ADMIN", "root"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.repository.policy_generation, PolicyGeneration::V1);
        assert_eq!(config.api_keys.len(), 2);
        assert_eq!(config.api_keys[1].identity, "root");
        assert_eq!(config.bootstrap_admin.as_deref(), Some("root"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&[("RAPPORT_PORT", "eighty")])),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            ApiConfig::from_lookup(lookup(&[("RAPPORT_POLICY_GENERATION", "v3")])),
            Err(ConfigError::PolicyGeneration(_))
        ));
        assert!(matches!(
            parse_key_bindings("no-identity"),
            Err(ConfigError::InvalidKeyBinding(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn test_key_bindings_parse_back(
            pairs in proptest::collection::vec(("[a-z0-9-]{1,16}", "[a-z][a-z0-9_]{0,12}"), 1..6)
        ) {
            let spec = pairs
                .iter()
                .map(|(k, i)| format!("{}:{}", k, i))
                .collect::<Vec<_>>()
                .join(",");
            let parsed = parse_key_bindings(&spec).unwrap();
            proptest::prop_assert_eq!(parsed.len(), pairs.len());
            for (binding, (key, identity)) in parsed.iter().zip(&pairs) {
                proptest::prop_assert_eq!(&binding.key, key);
                proptest::prop_assert_eq!(&binding.identity, identity);
            }
        }
    }
}
