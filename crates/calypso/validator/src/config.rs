//! Validator configuration
//!
//! Values come from the built-in defaults, then an optional TOML file, then
//! `VALIDATOR_`-prefixed environment variables, later sources winning.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Prefix of the environment variables overriding the configuration
pub const ENV_PREFIX: &str = "VALIDATOR_";

/// Reader back-end to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process simulated reader, cards and SAM
    #[default]
    Virtual,
    /// PC/SC readers
    Pcsc,
}

/// Validator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Reader back-end
    pub backend: BackendKind,
    /// Card reader name, the back-end's default when unset
    pub po_reader: Option<String>,
    /// SAM reader name, the back-end's default when unset
    pub sam_reader: Option<String>,
    /// Refuse to start without a SAM
    pub require_sam: bool,
    /// Upper bound on back-end registration, in milliseconds
    pub init_timeout_ms: u64,
    /// Include the legacy contactless fallback when the back-end supports it
    pub legacy_protocol: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Virtual,
            po_reader: None,
            sam_reader: None,
            require_sam: false,
            init_timeout_ms: 5_000,
            legacy_protocol: true,
        }
    }
}

impl ValidatorConfig {
    /// Load the configuration, merging `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX)).extract()
    }

    /// Registration timeout
    pub const fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_file() {
        Jail::expect_with(|_| {
            let config = ValidatorConfig::load(None)?;
            assert_eq!(config, ValidatorConfig::default());
            assert_eq!(config.init_timeout(), Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "validator.toml",
                r#"
                    backend = "pcsc"
                    po_reader = "ACS ACR122U"
                    init_timeout_ms = 2000
                "#,
            )?;
            jail.set_env("VALIDATOR_INIT_TIMEOUT_MS", "750");
            jail.set_env("VALIDATOR_REQUIRE_SAM", "true");

            let config = ValidatorConfig::load(Some(Path::new("validator.toml")))?;
            assert_eq!(config.backend, BackendKind::Pcsc);
            assert_eq!(config.po_reader.as_deref(), Some("ACS ACR122U"));
            assert_eq!(config.init_timeout_ms, 750);
            assert!(config.require_sam);
            assert!(config.legacy_protocol);
            Ok(())
        });
    }
}
