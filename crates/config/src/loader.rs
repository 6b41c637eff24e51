//! Configuration loading and validation
//!
//! Sources are layered, later ones winning: the defaults (or a risk profile), the first
//! configuration file found, then `POCKET_HEDGE__*` environment variables such as
//! `POCKET_HEDGE__RISK_LIMITS__MAX_POSITION_SIZE=0.2`.

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat, Map};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::profiles::RiskProfile;
use crate::schema::EngineConfig;

/// Default environment variable prefix
pub const ENV_PREFIX: &str = "POCKET_HEDGE";

/// Configuration loader
#[derive(Debug)]
pub struct ConfigLoader {
    /// Command-line specified config path
    cli_config_path: Option<PathBuf>,

    /// Environment variable prefix
    env_prefix: String,

    /// Environment snapshot to read instead of the process environment
    env_source: Option<Map<String, String>>,

    /// Search paths for configuration files
    search_paths: Vec<PathBuf>,

    /// Default configuration
    default_config: EngineConfig,

    /// Configuration sources that were used
    used_sources: Vec<String>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./pocket-hedge.json"), PathBuf::from("./pocket-hedge.yaml")];
        search_paths.extend(Self::user_config_path());

        Self {
            cli_config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
            env_source: None,
            search_paths,
            default_config: EngineConfig::default(),
            used_sources: Vec::new(),
        }
    }

    /// Set command-line specified config path
    pub fn with_cli_config_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        self.cli_config_path = path.map(|p| p.as_ref().to_path_buf());
        self
    }

    /// Set environment variable prefix
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read environment variables from a map instead of the process environment
    pub fn with_env_source(mut self, source: Map<String, String>) -> Self {
        self.env_source = Some(source);
        self
    }

    /// Replace the search paths
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Add a search path
    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) {
        self.search_paths.push(path.as_ref().to_path_buf());
    }

    /// Set default configuration
    pub fn with_default_config(mut self, config: EngineConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Start from a risk profile instead of the built-in defaults
    pub fn with_profile(self, profile: RiskProfile) -> Self {
        self.with_default_config(profile.config())
    }

    /// Load configuration
    pub fn load(&mut self) -> ConfigResult<EngineConfig> {
        info!("Loading configuration...");
        self.used_sources.clear();

        let mut builder = Config::builder().add_source(Config::try_from(&self.default_config)?);
        self.used_sources.push("default configuration".to_string());

        if let Some(path) = &self.cli_config_path {
            if !path.exists() {
                warn!(path = %path.display(), "CLI-specified config file not found");
                return Err(ConfigError::NotFound(path.clone()));
            }
            debug!(path = %path.display(), "loading CLI-specified configuration");
            builder = add_file_source(builder, path)?;
            self.used_sources.push(format!("CLI-specified config: {}", path.display()));
        } else if let Some(path) = self.search_paths.iter().find(|p| p.exists()) {
            debug!(path = %path.display(), "loading configuration file");
            builder = add_file_source(builder, path)?;
            self.used_sources.push(format!("config file: {}", path.display()));
        }

        let env_source = Environment::with_prefix(&self.env_prefix)
            .separator("__")
            .try_parsing(true)
            .source(self.env_source.clone());
        builder = builder.add_source(env_source);
        self.used_sources
            .push(format!("environment variables with prefix {}", self.env_prefix));

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(sources = %self.used_sources.join(", "), "configuration loaded");
        Ok(config)
    }

    /// Save configuration to a file, JSON unless the extension says YAML
    pub fn save_config(&self, config: &EngineConfig, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(config)?,
            _ => serde_json::to_string_pretty(config)?,
        };
        std::fs::write(path, contents)?;

        info!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Get the sources that were used to load the configuration
    pub fn used_sources(&self) -> &[String] {
        &self.used_sources
    }

    /// `<config dir>/pocket-hedge/config.json`
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pocket-hedge").join("config.json"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Add a file source, picking the format from the extension or the first character
fn add_file_source(builder: ConfigBuilder<DefaultState>, path: &Path) -> ConfigResult<ConfigBuilder<DefaultState>> {
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => FileFormat::Json,
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        _ => {
            let content = std::fs::read_to_string(path)
                .map_err(|source| ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })?;
            if content.trim_start().starts_with('{') {
                FileFormat::Json
            } else {
                FileFormat::Yaml
            }
        }
    };

    Ok(builder.add_source(File::from(path).format(format).required(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated() -> ConfigLoader {
        ConfigLoader::new()
            .with_search_paths(Vec::new())
            .with_env_source(Map::new())
    }

    fn env(entries: &[(&str, &str)]) -> Map<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_config_loader_default() {
        let loader = ConfigLoader::default();
        assert_eq!(loader.env_prefix, "POCKET_HEDGE");
        assert!(loader.search_paths.len() >= 2);
        assert!(loader.cli_config_path.is_none());
    }

    #[test]
    fn test_defaults_only() {
        let mut loader = isolated();
        let config = loader.load().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(loader.used_sources().len(), 2);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(
            &path,
            "risk_limits:\n  max_sector_exposure: 0.4\nrebalance:\n  strategy: time_based\n  frequency_days: 7\n",
        )
        .unwrap();

        let mut loader = isolated().with_cli_config_path(Some(&path));
        let config = loader.load().unwrap();

        assert_eq!(config.risk_limits.max_sector_exposure, 0.4);
        assert_eq!(config.risk_limits.max_position_size, 0.10);
        assert_eq!(config.rebalance.frequency_days, 7);
        assert!(loader
            .used_sources()
            .iter()
            .any(|s| s.contains(&*path.to_string_lossy())));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"risk_limits": {"max_position_size": 0.15}}"#).unwrap();

        let mut loader = isolated()
            .with_cli_config_path(Some(&path))
            .with_env_source(env(&[
                ("POCKET_HEDGE__RISK_LIMITS__MAX_POSITION_SIZE", "0.2"),
                ("POCKET_HEDGE__RISK__MONTE_CARLO__NUM_SIMULATIONS", "500"),
            ]));
        let config = loader.load().unwrap();

        assert_eq!(config.risk_limits.max_position_size, 0.2);
        assert_eq!(config.risk.monte_carlo.num_simulations, 500);
    }

    #[test]
    fn test_search_path_and_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pocket-hedge.json");
        std::fs::write(&path, r#"{"rebalance": {"fee_rate": 0.002}}"#).unwrap();

        let mut loader = isolated()
            .with_search_paths(vec![dir.path().join("missing.yaml"), path])
            .with_profile(RiskProfile::Conservative);
        let config = loader.load().unwrap();

        assert_eq!(config.risk_limits.max_position_size, 0.05);
        assert_eq!(config.rebalance.fee_rate, 0.002);
        assert_eq!(config.rebalance.threshold, 0.03);
    }

    #[test]
    fn test_missing_cli_path_is_an_error() {
        let mut loader = isolated().with_cli_config_path(Some("/nonexistent/pocket-hedge.json"));
        assert!(matches!(loader.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut loader = isolated().with_env_source(env(&[("POCKET_HEDGE__REBALANCE__THRESHOLD", "0")]));
        assert!(matches!(loader.load(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_config() -> ConfigResult<()> {
        let dir = tempdir()?;
        let config = RiskProfile::Aggressive.config();

        for name in ["saved.json", "saved.yaml"] {
            let path = dir.path().join("nested").join(name);
            isolated().save_config(&config, &path)?;

            let loaded = isolated().with_cli_config_path(Some(&path)).load()?;
            assert_eq!(loaded, config);
        }

        dir.close()?;
        Ok(())
    }
}
