use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// CoinMarketCap quotes endpoint used when the settings supply no override.
pub const DEFAULT_API_URL: &str =
    "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";

const SETTINGS_FILE_NAME: &str = ".pricemesh.json";
const ENV_API_KEY: &str = "PRICEMESH_API_KEY";
const ENV_API_URL: &str = "PRICEMESH_API_URL";

/// Process settings for the external price source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// API credential for the price source.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override for the price source endpoint.
    #[serde(default)]
    pub api_url: Option<String>,
}

impl Settings {
    /// Loads settings from `path`, or from `$HOME/.pricemesh.json` when no
    /// path is given. The default file may be absent. `PRICEMESH_API_KEY`
    /// and `PRICEMESH_API_URL` override whatever the file supplies.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env();
        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings file {}", path.display()))
    }

    fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(SETTINGS_FILE_NAME))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = env::var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Ok(url) = env::var(ENV_API_URL) {
            self.api_url = Some(url);
        }
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn write_temp_settings(name: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[serial]
    fn loads_settings_from_an_explicit_file() {
        env::remove_var(ENV_API_KEY);
        env::remove_var(ENV_API_URL);
        let path = write_temp_settings(
            "pricemesh-settings-file.json",
            r#"{"api_key": "file-key"}"#,
        );

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("file-key"));
        assert_eq!(settings.api_url(), DEFAULT_API_URL);

        fs::remove_file(path).unwrap();
    }

    #[test]
    #[serial]
    fn environment_overrides_the_file() {
        let path = write_temp_settings(
            "pricemesh-settings-env.json",
            r#"{"api_key": "file-key", "api_url": "https://file.example"}"#,
        );
        env::set_var(ENV_API_KEY, "env-key");
        env::set_var(ENV_API_URL, "https://env.example");

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("env-key"));
        assert_eq!(settings.api_url(), "https://env.example");

        env::remove_var(ENV_API_KEY);
        env::remove_var(ENV_API_URL);
        fs::remove_file(path).unwrap();
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("/nonexistent/pricemesh.json"))).is_err());
    }
}
