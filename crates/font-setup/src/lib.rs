use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use font_acquisition::{build_sources, FetchError, FontSource, HttpFetch, ReqwestFetcher, BROWSER_USER_AGENT};
use font_core::{RetryPolicy, RunOptions, ScanScope, SourceName};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Environment variable holding the Google Fonts API key
pub const API_KEY_ENV: &str = "GOOGLE_FONTS_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error(transparent)]
    Http(#[from] FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    pub scan_workers: usize,
    pub resolve_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            scan_workers: 4,
            resolve_workers: 3,
        }
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontFetchConfig {
    /// Providers in the order they are asked
    pub sources: Vec<String>,
    /// Replaces the platform font directories when non-empty
    pub font_dirs: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    // Tables last so the file serializes cleanly
    pub retry: RetrySettings,
    pub concurrency: ConcurrencySettings,
}

impl Default for FontFetchConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                "google-fonts".to_string(),
                "1001fonts".to_string(),
                "dafont".to_string(),
                "freefonts".to_string(),
            ],
            font_dirs: Vec::new(),
            install_dir: None,
            api_key: None,
            request_timeout_secs: 30,
            user_agent: BROWSER_USER_AGENT.to_string(),
            retry: RetrySettings::default(),
            concurrency: ConcurrencySettings::default(),
        }
    }
}

/// Everything a run needs, built from a config
pub struct FetchSetup {
    pub sources: Vec<Arc<dyn FontSource>>,
    pub http: Arc<dyn HttpFetch>,
    pub options: RunOptions,
}

impl FontFetchConfig {
    pub fn source_order(&self) -> Result<Vec<SourceName>, ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("no font sources configured".to_string()));
        }
        self.sources
            .iter()
            .map(|s| s.parse::<SourceName>().map_err(|e| ConfigError::Invalid(e.to_string())))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn run_options(&self, scope: ScanScope, dry_run: bool) -> Result<RunOptions, ConfigError> {
        if self.concurrency.scan_workers == 0 || self.concurrency.resolve_workers == 0 {
            return Err(ConfigError::Invalid("worker counts must be at least 1".to_string()));
        }
        Ok(RunOptions {
            scope,
            dry_run,
            scan_workers: self.concurrency.scan_workers,
            resolve_workers: self.concurrency.resolve_workers,
            retry: self.retry_policy(),
            font_dirs: self.font_dirs.clone(),
            install_dir: self.install_dir.clone(),
            ..RunOptions::default()
        })
    }

    /// Credential lookup: explicit value, then the environment, then the file
    pub fn resolve_api_key(&self, explicit: Option<String>) -> Option<String> {
        pick_api_key(explicit, std::env::var(API_KEY_ENV).ok(), self.api_key.clone())
    }

    /// Construct the HTTP client and providers for a run
    pub fn build(
        &self,
        explicit_key: Option<String>,
        scope: ScanScope,
        dry_run: bool,
    ) -> Result<FetchSetup, ConfigError> {
        let order = self.source_order()?;
        let options = self.run_options(scope, dry_run)?;
        let http: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(
            &self.user_agent,
            Duration::from_secs(self.request_timeout_secs),
        )?);
        let api_key = self.resolve_api_key(explicit_key);
        debug!("sources: {:?}, credential present: {}", order, api_key.is_some());
        let sources = build_sources(&order, http.clone(), api_key);
        Ok(FetchSetup { sources, http, options })
    }
}

fn pick_api_key(explicit: Option<String>, env: Option<String>, file: Option<String>) -> Option<String> {
    [explicit, env, file]
        .into_iter()
        .flatten()
        .map(|k| k.trim().to_string())
        .find(|k| !k.is_empty())
}

pub fn get_config_path() -> Result<PathBuf, ConfigError> {
    let project_dirs = ProjectDirs::from("com", "fontfetch", "fontfetch").ok_or(ConfigError::NoConfigDir)?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

/// Load `path`, or the platform config file. A missing file gives defaults.
pub fn load_config(path: Option<&Path>) -> Result<FontFetchConfig, ConfigError> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    if !config_path.exists() {
        debug!("no config at {}, using defaults", config_path.display());
        return Ok(FontFetchConfig::default());
    }

    let config_str = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    Ok(toml::from_str(&config_str)?)
}

pub fn save_config(config: &FontFetchConfig, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let config_str = toml::to_string_pretty(config)?;
    std::fs::write(&config_path, config_str).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    info!("Configuration saved to {}", config_path.display());
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, FontFetchConfig::default());
        assert_eq!(
            config.source_order().unwrap(),
            vec![
                SourceName::GoogleFonts,
                SourceName::OneThousandOneFonts,
                SourceName::DaFont,
                SourceName::FreeFonts
            ]
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "sources = [\"dafont\", \"google-fonts\"]\n\n[concurrency]\nresolve_workers = 1\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.source_order().unwrap(), vec![SourceName::DaFont, SourceName::GoogleFonts]);
        assert_eq!(config.concurrency.resolve_workers, 1);
        assert_eq!(config.concurrency.scan_workers, 4);
        assert_eq!(config.retry, RetrySettings::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = FontFetchConfig {
            install_dir: Some(PathBuf::from("/tmp/fonts")),
            api_key: Some("key".to_string()),
            ..FontFetchConfig::default()
        };
        save_config(&config, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn bad_values_are_rejected() {
        let config = FontFetchConfig {
            sources: vec!["fontsquirrel".to_string()],
            ..FontFetchConfig::default()
        };
        assert!(matches!(config.source_order(), Err(ConfigError::Invalid(_))));

        let config = FontFetchConfig {
            concurrency: ConcurrencySettings {
                scan_workers: 0,
                resolve_workers: 3,
            },
            ..FontFetchConfig::default()
        };
        assert!(config.run_options(ScanScope::Both, false).is_err());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "sources = 3").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn credential_precedence() {
        let file = Some("from-file".to_string());
        assert_eq!(
            pick_api_key(Some("cli".into()), Some("env".into()), file.clone()).as_deref(),
            Some("cli")
        );
        assert_eq!(pick_api_key(None, Some("env".into()), file.clone()).as_deref(), Some("env"));
        assert_eq!(pick_api_key(None, Some("  ".into()), file).as_deref(), Some("from-file"));
        assert_eq!(pick_api_key(None, None, None), None);
    }

    #[test]
    fn run_options_carry_the_config() {
        let config = FontFetchConfig {
            font_dirs: vec![PathBuf::from("/fonts")],
            retry: RetrySettings {
                max_attempts: 5,
                base_delay_ms: 10,
                max_delay_ms: 40,
            },
            ..FontFetchConfig::default()
        };
        let options = config.run_options(ScanScope::SettingsOnly, true).unwrap();
        assert!(options.dry_run);
        assert_eq!(options.scope, ScanScope::SettingsOnly);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.delay_for(3), Duration::from_millis(40));
        assert_eq!(options.font_dirs, vec![PathBuf::from("/fonts")]);
    }
}
