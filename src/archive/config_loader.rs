use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),

    #[error("Failed to acquire lock: {0}")]
    LockError(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Config structs for config.toml
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Paths {
    pub output_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Http {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Pools {
    pub max_download_concurrency: usize,
    pub max_page_concurrency: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Output {
    pub nest_by_creator: bool,
    pub show_progress: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub log_level: String,
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: Paths,
    pub http: Http,
    pub pools: Pools,
    pub output: Output,
    pub logging: Logging,
}

// Default implementation for AppConfig
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                output_directory: "./yiff-dl-output".to_string(),
                log_directory: "./logs".to_string(),
            },
            http: Http {
                base_url: "https://yiff.party".to_string(),
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:68.0) Gecko/20100101 Firefox/68.0".to_string(),
                timeout_secs: 300,
                connect_timeout_secs: 30,
            },
            pools: Pools {
                max_download_concurrency: 4,
                max_page_concurrency: 2,
            },
            output: Output {
                nest_by_creator: false,
                show_progress: true,
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "text".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
        }
    }
}

/// Values supplied on the command line. `None` keeps the config file value.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub output_directory: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub nest_by_creator: bool,
    pub max_download_concurrency: Option<usize>,
    pub no_progress: bool,
}

impl AppConfig {
    /// Applies command line overrides on top of the loaded file.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.output_directory {
            self.paths.output_directory = dir.to_string_lossy().into_owned();
        }
        if let Some(ua) = &overrides.user_agent {
            self.http.user_agent = ua.clone();
        }
        if overrides.nest_by_creator {
            self.output.nest_by_creator = true;
        }
        if let Some(n) = overrides.max_download_concurrency {
            self.pools.max_download_concurrency = n;
        }
        if overrides.no_progress {
            self.output.show_progress = false;
        }
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pools.max_download_concurrency == 0 {
            return Err(ConfigError::Invalid("pools.max_download_concurrency must be at least 1".to_string()));
        }
        if self.pools.max_page_concurrency == 0 {
            return Err(ConfigError::Invalid("pools.max_page_concurrency must be at least 1".to_string()));
        }
        if reqwest::Url::parse(&self.http.base_url).is_err() {
            return Err(ConfigError::Invalid(format!("http.base_url is not a valid URL: {}", self.http.base_url)));
        }
        Ok(())
    }
}

// Config manager to handle the configuration file
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            tracing::info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;

        let manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
        };

        manager.create_default_config()?;

        Ok(manager)
    }

    // Load app config from config.toml
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join("config.toml");

        if !config_path.exists() {
            tracing::warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config.toml: {}", e);
                tracing::info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) = fs::rename(&config_path, config_path.with_extension("toml.backup")) {
                    tracing::warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                let toml_string = toml::to_string_pretty(&default_config)
                    .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
                fs::write(&config_path, toml_string)?;
                tracing::info!("Created new config.toml with default values");

                Ok(default_config)
            }
        }
    }

    // Get a copy of the app config
    pub fn get_app_config(&self) -> ConfigResult<AppConfig> {
        self.app_config
            .read()
            .map(|config| config.clone())
            .map_err(|e| ConfigError::LockError(e.to_string()))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    // Save app config to config.toml
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::TomlSer(e.to_string()))?;
        fs::write(self.config_path(), toml_string)?;

        let mut app_config = self
            .app_config
            .write()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;
        *app_config = config.clone();

        Ok(())
    }

    // Create the default config file if it doesn't exist
    pub fn create_default_config(&self) -> ConfigResult<()> {
        let config_path = self.config_path();
        if !config_path.exists() {
            let default_config = AppConfig::default();
            self.save_app_config(&default_config)?;
            tracing::info!("Created default config.toml at {}", config_path.display());
        }
        Ok(())
    }
}

/// Load (or create) the configuration in `config_dir`.
pub fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<ConfigManager> {
    ConfigManager::new(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.http.base_url, "https://yiff.party");
        assert_eq!(config.paths.output_directory, "./yiff-dl-output");
        assert_eq!(config.pools.max_download_concurrency, 4);
        assert!(!config.output.nest_by_creator);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config_is_created() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).unwrap();

        assert!(dir.path().join("config.toml").exists());
        let config = manager.get_app_config().unwrap();
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_custom_values_are_loaded() {
        let dir = tempdir().unwrap();
        let mut custom = AppConfig::default();
        custom.pools.max_page_concurrency = 7;
        custom.http.user_agent = "test-agent".to_string();
        fs::write(dir.path().join("config.toml"), toml::to_string_pretty(&custom).unwrap()).unwrap();

        let config = init_config(dir.path()).unwrap().get_app_config().unwrap();
        assert_eq!(config.pools.max_page_concurrency, 7);
        assert_eq!(config.http.user_agent, "test-agent");
    }

    #[test]
    fn test_corrupted_config_is_backed_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "this is [not valid toml").unwrap();

        let config = init_config(dir.path()).unwrap().get_app_config().unwrap();
        assert_eq!(config.pools.max_download_concurrency, 4);
        assert!(dir.path().join("config.toml.backup").exists());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = AppConfig::default();
        config.apply_overrides(&ConfigOverrides {
            output_directory: Some(PathBuf::from("/tmp/out")),
            user_agent: Some("ua".to_string()),
            nest_by_creator: true,
            max_download_concurrency: Some(9),
            no_progress: true,
        });

        assert_eq!(config.paths.output_directory, "/tmp/out");
        assert_eq!(config.http.user_agent, "ua");
        assert!(config.output.nest_by_creator);
        assert_eq!(config.pools.max_download_concurrency, 9);
        assert!(!config.output.show_progress);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.pools.max_download_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
