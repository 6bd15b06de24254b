use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::Deserialize;

use crate::pki::{PassiveAuthOptions, RevocationPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub revocation: RevocationConfig,
    pub passive_auth: PassiveAuthConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Records written per unit of work
    pub batch_size: usize,
    /// Suffix of every directory key
    pub base_dn: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationConfig {
    pub enabled: bool,
    pub hot_ttl_seconds: u64,
}

impl RevocationConfig {
    pub fn hot_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_ttl_seconds)
    }
}

/// Options for Passive Authentication of the `.sod` documents found beside the ingest files.
#[derive(Debug, Clone, Deserialize)]
pub struct PassiveAuthConfig {
    pub check_revocation: bool,
    pub revocation_policy: RevocationPolicy,
}

impl PassiveAuthConfig {
    pub fn options(&self) -> PassiveAuthOptions {
        PassiveAuthOptions {
            check_revocation: self.check_revocation,
            revocation_policy: self.revocation_policy,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Directory scanned for certificate, CRL and master list files
    pub path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config/settings"), env_vars)
    }

    /// Like [`Config::load_with_sources`] with an explicit settings file (extension optional).
    pub fn load_from(
        settings: &Path,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let settings = settings.to_string_lossy();
        let mut builder = ConfigLib::builder()
            .set_default("engine.batch_size", 500)?
            .set_default("engine.base_dn", crate::directory::DEFAULT_BASE_DN)?
            .set_default("revocation.enabled", true)?
            .set_default("revocation.hot_ttl_seconds", 300)?
            .set_default("passive_auth.check_revocation", true)?
            .set_default("passive_auth.revocation_policy", "advisory")?
            .set_default("ingest.path", "data")?
            .add_source(File::with_name(&settings).required(false));

        // Explicit overrides keep tests independent of the process environment.
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. APP_ENGINE__BATCH_SIZE or APP_PASSIVE_AUTH__REVOCATION_POLICY
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert_eq!(config.engine.batch_size, 500);
        assert_eq!(config.engine.base_dn, "dc=icao,dc=int");
        assert!(config.revocation.enabled);
        assert_eq!(config.revocation.hot_ttl(), Duration::from_secs(300));
        assert!(config.passive_auth.check_revocation);
        assert_eq!(
            config.passive_auth.revocation_policy,
            RevocationPolicy::Advisory
        );
        assert_eq!(config.ingest.path, PathBuf::from("data"));
    }

    #[test]
    fn test_override_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert("engine.batch_size".to_string(), "50".to_string());
        env_vars.insert(
            "passive_auth.revocation_policy".to_string(),
            "strict".to_string(),
        );
        env_vars.insert("revocation.enabled".to_string(), "false".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.engine.batch_size, 50);
        assert!(!config.revocation.enabled);
        assert_eq!(
            config.passive_auth.options().revocation_policy,
            RevocationPolicy::Strict
        );
        // untouched values keep their defaults
        assert_eq!(config.revocation.hot_ttl_seconds, 300);
    }

    #[test]
    fn test_settings_file_below_overrides() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[engine]\nbase_dn = \"dc=pkd,dc=example\"\nbatch_size = 10\n\n[ingest]\npath = \"/var/lib/pkd\"\n",
        )
        .unwrap();

        let mut env_vars = HashMap::new();
        env_vars.insert("engine.batch_size".to_string(), "20".to_string());
        let config = Config::load_from(&path, Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.engine.base_dn, "dc=pkd,dc=example");
        assert_eq!(config.engine.batch_size, 20);
        assert_eq!(config.ingest.path, PathBuf::from("/var/lib/pkd"));
        assert!(config.revocation.enabled);
    }
}
