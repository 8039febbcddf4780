use std::{env, path::PathBuf, time::Duration};

use dirs_next::config_dir;
use guidepost_util::expand_tilde;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding the engine configuration file path.
pub const CONFIG_PATH_ENV: &str = "GUIDEPOST_CONFIG_PATH";

const DEFAULT_EXPERIMENT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FEATURED_LOOKUP_TIMEOUT_MS: u64 = 2_000;

/// Engine settings read from `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Request that a plugin's first walkthrough opens when the plugin is installed this session.
    pub open_on_install: bool,
    /// Upper bound on waiting for an experiment override of a walkthrough's `when`.
    pub experiment_timeout_ms: u64,
    /// Upper bound on the workspace glob search behind `featuredFor`.
    pub featured_lookup_timeout_ms: u64,
    /// Workspace folders searched for `featuredFor` globs.
    pub workspace_folders: Vec<PathBuf>,
    /// Optional state file location; falls back to `GUIDEPOST_STATE_PATH` / the config dir.
    pub state_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_on_install: true,
            experiment_timeout_ms: DEFAULT_EXPERIMENT_TIMEOUT_MS,
            featured_lookup_timeout_ms: DEFAULT_FEATURED_LOOKUP_TIMEOUT_MS,
            workspace_folders: Vec::new(),
            state_file: None,
        }
    }
}

impl EngineConfig {
    /// Loads the configuration from the default path. Missing or invalid files yield defaults.
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "Invalid engine config; using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn experiment_timeout(&self) -> Duration {
        Duration::from_millis(self.experiment_timeout_ms)
    }

    pub fn featured_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.featured_lookup_timeout_ms)
    }
}

/// Get the default path for the engine configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("guidepost")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_config_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "openOnInstall": false, "workspaceFolders": ["/work"] }"#).unwrap();

        let config = EngineConfig::load_from(&path);
        assert!(!config.open_on_install);
        assert_eq!(config.workspace_folders, vec![PathBuf::from("/work")]);
        assert_eq!(config.experiment_timeout(), Duration::from_secs(5));
        assert_eq!(config.featured_lookup_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn invalid_or_missing_config_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(EngineConfig::load_from(&path), EngineConfig::default());
    }

    #[test]
    fn config_path_honors_env_override() {
        temp_env::with_var(CONFIG_PATH_ENV, Some("/tmp/guidepost/config.json"), || {
            assert_eq!(default_config_path(), PathBuf::from("/tmp/guidepost/config.json"));
        });
    }
}
