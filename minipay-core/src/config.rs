use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use strum::{Display, EnumString};

use crate::error::{MiniPayResult, ValidationKind};

const ENV_ENVIRONMENT: &str = "MINIPAY_ENVIRONMENT";
const ENV_DURABLE_URL: &str = "MINIPAY_DURABLE_URL";
const ENV_DURABLE_KEY: &str = "MINIPAY_DURABLE_KEY";
const ENV_DATA_DIR: &str = "MINIPAY_DATA_DIR";

const MIN_API_KEY_LEN: usize = 50;

/// Payment network the wallet operates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Environment {
    /// Test network.
    #[default]
    Staging,
    /// Public network.
    Production,
}

impl Environment {
    /// Network passphrase used when signing and in payment URIs.
    #[must_use]
    pub const fn network_passphrase(self) -> &'static str {
        match self {
            Self::Staging => "Test SDF Network ; September 2015",
            Self::Production => "Public Global Stellar Network ; September 2015",
        }
    }
}

/// Connection details of the remote durable store.
#[derive(Clone, PartialEq, Eq)]
pub struct DurableBackendConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Anonymous API key sent as `apikey` and bearer token.
    pub api_key: String,
}

impl DurableBackendConfig {
    /// A backend is usable only with an https URL and a real (non-placeholder) key.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.url.starts_with("https://")
            && self.api_key.len() > MIN_API_KEY_LEN
            && !self.url.contains("placeholder")
            && !self.api_key.contains("placeholder")
    }
}

impl fmt::Debug for DurableBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableBackendConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Where durable records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StorageMode {
    /// Durable records go to the remote store.
    Remote,
    /// Durable records are persisted on this device only.
    LocalOnly,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct MiniPayConfig {
    /// Target network.
    pub environment: Environment,
    /// Remote durable store, if any.
    pub durable: Option<DurableBackendConfig>,
    /// Directory of the on-device cache.
    pub data_dir: Option<PathBuf>,
}

impl MiniPayConfig {
    /// Reads the configuration from `MINIPAY_*` environment variables.
    ///
    /// The durable backend is only set when both the URL and the key are present.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `MINIPAY_ENVIRONMENT` is not a known environment.
    pub fn from_env() -> MiniPayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> MiniPayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let environment = non_empty(ENV_ENVIRONMENT)
            .map(|raw| {
                Environment::from_str(raw.trim()).map_err(|_| {
                    ValidationKind::Config(format!("unknown environment `{raw}`"))
                })
            })
            .transpose()?
            .unwrap_or_default();

        let durable = match (non_empty(ENV_DURABLE_URL), non_empty(ENV_DURABLE_KEY)) {
            (Some(url), Some(api_key)) => Some(DurableBackendConfig { url, api_key }),
            _ => None,
        };

        Ok(Self {
            environment,
            durable,
            data_dir: non_empty(ENV_DATA_DIR).map(PathBuf::from),
        })
    }

    /// Remote iff a fully configured durable backend is present.
    #[must_use]
    pub fn storage_mode(&self) -> StorageMode {
        match &self.durable {
            Some(backend) if backend.is_configured() => StorageMode::Remote,
            _ => StorageMode::LocalOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn real_key() -> String {
        format!("eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.{}", "a".repeat(40))
    }

    #[test_case("https://abc.supabase.co", &real_key(), true ; "configured")]
    #[test_case("http://abc.supabase.co", &real_key(), false ; "plain http")]
    #[test_case("https://abc.supabase.co", "short-key", false ; "short key")]
    #[test_case("https://placeholder.supabase.co", &real_key(), false ; "placeholder url")]
    fn test_is_configured(url: &str, api_key: &str, expected: bool) {
        let config = DurableBackendConfig {
            url: url.to_string(),
            api_key: api_key.to_string(),
        };
        assert_eq!(config.is_configured(), expected);
    }

    #[test]
    fn test_from_lookup_selects_remote_mode() {
        let key = real_key();
        let config = MiniPayConfig::from_lookup(lookup_from(&[
            (ENV_ENVIRONMENT, "production"),
            (ENV_DURABLE_URL, "https://abc.supabase.co"),
            (ENV_DURABLE_KEY, &key),
            (ENV_DATA_DIR, "/tmp/minipay"),
        ]))
        .unwrap();

        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.storage_mode(), StorageMode::Remote);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/minipay")));
    }

    #[test]
    fn test_missing_key_falls_back_to_local_only() {
        let config = MiniPayConfig::from_lookup(lookup_from(&[(
            ENV_DURABLE_URL,
            "https://abc.supabase.co",
        )]))
        .unwrap();

        assert!(config.durable.is_none());
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.storage_mode(), StorageMode::LocalOnly);
    }

    #[test]
    fn test_unknown_environment_is_rejected() {
        let result = MiniPayConfig::from_lookup(lookup_from(&[(ENV_ENVIRONMENT, "mainnet")]));
        assert!(matches!(
            result,
            Err(crate::MiniPayError::Validation(ValidationKind::Config(_)))
        ));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = DurableBackendConfig {
            url: "https://abc.supabase.co".to_string(),
            api_key: real_key(),
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("eyJhbGci"));
    }
}
