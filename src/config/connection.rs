//! Connection-level options shared by every source in a collection.
//!
//! All fields are optional; absence means "inherit from the environment",
//! i.e. the default rusoto credential chain and region resolution.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::errors::{CollectError, CollectResult};

/// Credentials, region, retry, and endpoint options for one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Regions this connection may address
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    /// Region used when a source names none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_region: Option<String>,
    /// Shared-credentials profile name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// Maximum attempts per AWS call before the error surfaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_retry_attempts: Option<u32>,
    /// Base backoff delay in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_error_retry_delay: Option<u64>,
    /// Service error codes that downgrade to a logged skip
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_error_codes: Vec<String>,
    /// Custom endpoint, e.g. a localstack or MinIO URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    /// Address S3 with path-style URLs (only meaningful with an endpoint)
    #[serde(default)]
    pub s3_force_path_style: bool,
}

impl ConnectionConfig {
    /// Validate cross-field consistency. Static keys must come in pairs.
    pub fn validate(&self) -> CollectResult<()> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(CollectError::Config(
                "access_key and secret_key must be provided together".to_string(),
            ));
        }
        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(CollectError::Config(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint_url {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(CollectError::Config(format!(
                    "endpoint_url must be an http(s) URL, got '{}'",
                    endpoint
                )));
            }
        }
        Ok(())
    }

    /// Retry attempts for AWS calls, defaulted when unset.
    pub fn retry_attempts(&self) -> u32 {
        self.max_error_retry_attempts.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    /// Base retry delay in millis, defaulted when unset.
    pub fn retry_base_delay_ms(&self) -> u64 {
        self.min_error_retry_delay
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS)
    }

    /// First configured ignore code appearing in a rendered service error.
    /// Rusoto service errors carry their code inside the variant, so callers
    /// match against the debug rendering.
    pub fn ignored_code_in(&self, rendered: &str) -> Option<&str> {
        self.ignore_error_codes
            .iter()
            .map(String::as_str)
            .find(|code| rendered.contains(code))
    }

    /// True when path-style addressing is requested but cannot take effect.
    pub fn path_style_is_noop(&self) -> bool {
        self.s3_force_path_style && self.endpoint_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(ConnectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_lone_access_key_rejected() {
        let config = ConnectionConfig {
            access_key: Some("AKIA0000".into()),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CollectError::Config(_)));
    }

    #[test]
    fn test_session_token_requires_keys() {
        let config = ConnectionConfig {
            session_token: Some("tok".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_pair_with_token_accepted() {
        let config = ConnectionConfig {
            access_key: Some("AKIA0000".into()),
            secret_key: Some("secret".into()),
            session_token: Some("tok".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let config = ConnectionConfig {
            endpoint_url: Some("localhost:9000".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.retry_attempts(), DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_base_delay_ms(), DEFAULT_RETRY_BASE_DELAY_MS);
    }

    #[test]
    fn test_ignored_code_in_rendered_error() {
        let config = ConnectionConfig {
            ignore_error_codes: vec!["AccessDenied".into()],
            ..Default::default()
        };
        assert_eq!(
            config.ignored_code_in("Unknown(AccessDenied: no thanks)"),
            Some("AccessDenied")
        );
        assert_eq!(config.ignored_code_in("NoSuchKey(\"k\")"), None);
    }

    #[test]
    fn test_path_style_noop_without_endpoint() {
        let mut config = ConnectionConfig {
            s3_force_path_style: true,
            ..Default::default()
        };
        assert!(config.path_style_is_noop());
        config.endpoint_url = Some("http://localhost:4566".into());
        assert!(!config.path_style_is_noop());
        config.s3_force_path_style = false;
        assert!(!config.path_style_is_noop());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = ConnectionConfig {
            default_region: Some("eu-west-1".into()),
            profile: Some("collector".into()),
            ignore_error_codes: vec!["AccessDenied".into()],
            s3_force_path_style: true,
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ConnectionConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
