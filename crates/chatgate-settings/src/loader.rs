//! Layered settings loading.
//!
//! Later layers override earlier ones key by key:
//! 1. Compiled [`GatewaySettings::default()`]
//! 2. `configs/config.yaml`, then `config.yaml` (each skipped when absent)
//! 3. An explicit `--config` file (must exist)
//! 4. `CHATGATE_*` environment variables, `__` separating sections
//!    (`CHATGATE_SERVER__PORT=9090` sets `server.port`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

pub const ENV_PREFIX: &str = "CHATGATE_";

/// Config files probed when no explicit path is given, lowest priority first.
pub fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("configs").join("config.yaml"),
        PathBuf::from("config.yaml"),
    ]
}

/// Builder over the figment provider stack.
#[derive(Clone, Debug)]
pub struct SettingsLoader {
    search_paths: Vec<PathBuf>,
    explicit: Option<PathBuf>,
    env_prefix: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            explicit: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the optional search paths.
    #[must_use]
    pub fn search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Layer a required file above the search paths.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    #[must_use]
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// The merged provider stack, before extraction.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(GatewaySettings::default()));
        for path in &self.search_paths {
            if path.exists() {
                debug!(?path, "layering settings file");
                figment = figment.merge(Yaml::file(path));
            }
        }
        if let Some(path) = &self.explicit {
            if !path.exists() {
                return Err(SettingsError::MissingFile(path.display().to_string()));
            }
            debug!(?path, "layering explicit settings file");
            figment = figment.merge(Yaml::file(path));
        }
        Ok(figment.merge(Env::prefixed(&self.env_prefix).split("__")))
    }

    /// Extract and validate.
    pub fn load(&self) -> Result<GatewaySettings> {
        let settings: GatewaySettings = self.figment()?.extract()?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Load with the default search paths plus an optional explicit file.
pub fn load_settings(explicit: Option<&Path>) -> Result<GatewaySettings> {
    let mut loader = SettingsLoader::new();
    if let Some(path) = explicit {
        loader = loader.file(path);
    }
    loader.load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunMode;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn isolated(prefix: &str) -> SettingsLoader {
        SettingsLoader::new()
            .search_paths(Vec::new())
            .env_prefix(prefix)
    }

    #[test]
    fn defaults_without_files() {
        let s = isolated("CHATGATE_TEST_NONE_").load().unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.llm.provider, "echo");
    }

    #[test]
    fn yaml_overrides_defaults_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(
            &dir,
            "config.yaml",
            "server:\n  port: 9000\n  mode: release\nllm:\n  provider: ollama_llm\n  model: qwen2\n  baseUrl: http://localhost:11434\n",
        );
        let s = isolated("CHATGATE_TEST_YAML_").file(&path).load().unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.mode, RunMode::Release);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.llm.provider, "ollama_llm");
        assert_eq!(s.llm.base_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(s.session.outbound_queue, 100);
    }

    #[test]
    fn later_search_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let low = write_yaml(&dir, "a.yaml", "chat:\n  timeout_secs: 5\nserver:\n  port: 1111\n");
        let high = write_yaml(&dir, "b.yaml", "server:\n  port: 2222\n");
        let s = isolated("CHATGATE_TEST_ORDER_")
            .search_paths(vec![low, high])
            .load()
            .unwrap();
        assert_eq!(s.server.port, 2222);
        assert_eq!(s.chat.timeout_secs, 5);
    }

    #[test]
    fn missing_search_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let s = isolated("CHATGATE_TEST_SKIP_")
            .search_paths(vec![dir.path().join("absent.yaml")])
            .load()
            .unwrap();
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = isolated("CHATGATE_TEST_MISSING_")
            .file(dir.path().join("absent.yaml"))
            .load()
            .unwrap_err();
        assert!(matches!(err, SettingsError::MissingFile(_)));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "config.yaml", "server:\n  port: 9000\n");
        std::env::set_var("CHATGATE_TEST_ENV_SERVER__PORT", "9191");
        std::env::set_var("CHATGATE_TEST_ENV_RELAY__EXPOSE_ERRORS", "true");
        let s = isolated("CHATGATE_TEST_ENV_").file(&path).load().unwrap();
        std::env::remove_var("CHATGATE_TEST_ENV_SERVER__PORT");
        std::env::remove_var("CHATGATE_TEST_ENV_RELAY__EXPOSE_ERRORS");
        assert_eq!(s.server.port, 9191);
        assert!(s.relay.expose_errors);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "config.yaml", "server: [unclosed\n");
        let err = isolated("CHATGATE_TEST_BAD_").file(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::Figment(_)));
    }

    #[test]
    fn invalid_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_yaml(&dir, "config.yaml", "relay:\n  event_buffer: 0\n");
        let err = isolated("CHATGATE_TEST_ZERO_").file(&path).load().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }
}
