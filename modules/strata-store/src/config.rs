use std::env;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use strata_core::{Result, StoreError};
use tracing::info;
use typed_builder::TypedBuilder;

use crate::execution::{ExecutionStrategy, Platform};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compatibility {
    /// Never build code at runtime. The plugin chain is always composed from
    /// closures, so this only records the host's policy.
    pub strict_content_security_policy: bool,
}

/// Store configuration.
#[derive(Clone, TypedBuilder)]
pub struct StoreConfig {
    /// Log a warning whenever one action is handled on overlapping paths.
    #[builder(default)]
    pub development_mode: bool,

    #[builder(default)]
    pub compatibility: Compatibility,

    /// Overrides the default `DispatchOutsideDomainStrategy`.
    #[builder(default, setter(strip_option))]
    pub execution_strategy: Option<Arc<dyn ExecutionStrategy>>,

    /// Platform the default strategy is built for.
    #[builder(default)]
    pub platform: Platform,

    /// Seed values merged into the tree before any state is registered.
    #[builder(default = Value::Object(Map::new()))]
    pub defaults_state: Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("development_mode", &self.development_mode)
            .field("compatibility", &self.compatibility)
            .field("custom_execution_strategy", &self.execution_strategy.is_some())
            .field("platform", &self.platform)
            .field("defaults_state", &self.defaults_state)
            .finish()
    }
}

impl StoreConfig {
    /// Load configuration from environment variables. Every variable is
    /// optional; malformed values are configuration errors.
    pub fn from_env() -> Result<Self> {
        let defaults_state = match env::var("STRATA_DEFAULTS_STATE") {
            Ok(raw) => {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    StoreError::Config(format!("STRATA_DEFAULTS_STATE is not valid JSON: {e}"))
                })?;
                if !value.is_object() {
                    return Err(StoreError::Config(
                        "STRATA_DEFAULTS_STATE must be a JSON object".into(),
                    ));
                }
                value
            }
            Err(_) => Value::Object(Map::new()),
        };

        let platform = match env::var("STRATA_PLATFORM") {
            Ok(raw) => raw.parse()?,
            Err(_) => Platform::default(),
        };

        Ok(Self {
            development_mode: env_flag("STRATA_DEVELOPMENT_MODE")?,
            compatibility: Compatibility {
                strict_content_security_policy: env_flag("STRATA_STRICT_CSP")?,
            },
            execution_strategy: None,
            platform,
            defaults_state,
        })
    }

    pub fn log_summary(&self) {
        info!(
            development_mode = self.development_mode,
            strict_csp = self.compatibility.strict_content_security_policy,
            platform = ?self.platform,
            custom_strategy = self.execution_strategy.is_some(),
            "Store config loaded"
        );
    }
}

fn env_flag(key: &str) -> Result<bool> {
    match env::var(key) {
        Err(_) => Ok(false),
        Ok(raw) => parse_flag(&raw)
            .ok_or_else(|| StoreError::Config(format!("{key} must be a boolean, got '{raw}'"))),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_default_config() {
        let config = StoreConfig::builder().build();
        assert!(!config.development_mode);
        assert!(!config.compatibility.strict_content_security_policy);
        assert!(config.execution_strategy.is_none());
        assert_eq!(config.platform, Platform::Browser);
        assert_eq!(config.defaults_state, Value::Object(Map::new()));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
