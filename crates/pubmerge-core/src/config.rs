use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Root application configuration, loaded from `~/.config/pubmerge/config.toml`.
///
/// Credentials can be overridden from the environment
/// (`PUBMERGE_CONTACT_EMAIL`, `PUBMERGE_SCOPUS_API_KEY`, `PUBMERGE_CACHE_DIR`)
/// so they never have to live in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the on-disk response cache (`raw/`, `processed/` partitions).
    pub cache_dir: PathBuf,

    /// Operator contact address, attached to every PubMed request per the
    /// NCBI usage policy. Required when the PubMed source is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    /// Elsevier API key. Required when the Scopus source is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopus_api_key: Option<String>,

    /// Fixed source ranking used to resolve merge conflicts. Earlier wins.
    pub source_priority: Vec<String>,

    /// Non-API sources whose pre-normalized records under
    /// `processed/<name>/` are folded into the merge when present.
    pub seed_sources: Vec<String>,

    pub sources: SourcesConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub pubmed: bool,
    pub scopus: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hard per-request timeout. A request that exceeds it is a transient
    /// failure, never a hang.
    pub timeout_secs: u64,
    /// Minimum pause between consecutive requests to the same source.
    pub min_interval_ms: u64,
    /// Publications collated in flight at once.
    pub concurrency: usize,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for AppConfig {
    fn default() -> Self {
        let cache_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("pubmerge")
            .join("cache");

        Self {
            cache_dir,
            contact_email: None,
            scopus_api_key: None,
            source_priority: vec![
                "zotero".to_string(),
                "pubmed".to_string(),
                "scopus".to_string(),
            ],
            seed_sources: vec!["zotero".to_string()],
            sources: SourcesConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pubmed: true,
            scopus: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            min_interval_ms: 350,
            concurrency: 4,
        }
    }
}

// ─── Loading & validation ──────────────────────────────────

impl AppConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("pubmerge")
            .join("config.toml")
    }

    /// Load from `path` (or the default location). A missing file yields the
    /// defaults; a present but unparseable file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(email) = env_first(["PUBMERGE_CONTACT_EMAIL", "POLITE_POOL_EMAIL"]) {
            self.contact_email = Some(email);
        }
        if let Some(key) = env_first(["PUBMERGE_SCOPUS_API_KEY", "SCOPUS_API_KEY"]) {
            self.scopus_api_key = Some(key);
        }
        if let Some(dir) = env_first(["PUBMERGE_CACHE_DIR"]) {
            self.cache_dir = PathBuf::from(dir);
        }
    }

    /// Startup validation: missing required credentials are fatal before any
    /// fetch begins.
    pub fn validate(&self) -> Result<()> {
        if self.sources.pubmed && !has_value(&self.contact_email) {
            return Err(CoreError::ConfigError(
                "contact_email is required while the pubmed source is enabled \
                 (set it in config.toml or PUBMERGE_CONTACT_EMAIL)"
                    .to_string(),
            ));
        }
        if self.sources.scopus && !has_value(&self.scopus_api_key) {
            return Err(CoreError::ConfigError(
                "scopus_api_key is required while the scopus source is enabled \
                 (set it in config.toml or PUBMERGE_SCOPUS_API_KEY)"
                    .to_string(),
            ));
        }
        if self.source_priority.is_empty() {
            return Err(CoreError::ConfigError(
                "source_priority must list at least one source".to_string(),
            ));
        }
        if self.network.concurrency == 0 {
            return Err(CoreError::ConfigError(
                "network.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn has_value(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn env_first<const N: usize>(keys: [&str; N]) -> Option<String> {
    keys.into_iter()
        .find_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> AppConfig {
        AppConfig {
            sources: SourcesConfig {
                pubmed: false,
                scopus: false,
            },
            ..Default::default()
        }
    }

    #[test]
    fn defaults_validate_with_sources_disabled() {
        assert!(offline_config().validate().is_ok());
    }

    #[test]
    fn pubmed_requires_contact_email() {
        let config = AppConfig {
            sources: SourcesConfig {
                pubmed: true,
                scopus: false,
            },
            contact_email: None,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigError(msg)) if msg.contains("contact_email")
        ));
    }

    #[test]
    fn scopus_requires_api_key() {
        let config = AppConfig {
            sources: SourcesConfig {
                pubmed: false,
                scopus: true,
            },
            scopus_api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigError(msg)) if msg.contains("scopus_api_key")
        ));
    }

    #[test]
    fn empty_priority_is_rejected() {
        let config = AppConfig {
            source_priority: Vec::new(),
            ..offline_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip_keeps_priority_order() {
        let config = AppConfig {
            source_priority: vec!["scopus".to_string(), "pubmed".to_string()],
            ..offline_config()
        };
        let raw = toml::to_string(&config).unwrap();
        let back: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.source_priority, config.source_priority);
    }
}
