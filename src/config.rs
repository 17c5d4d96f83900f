use crate::error::{Result, ShimError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub native: NativeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Limit on establishing the native connection. Replies, streamed ones
    /// included, may take as long as the native server needs.
    #[serde(default = "default_connect_timeout_secs", alias = "timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            native: NativeConfig::default(),
        }
    }
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11435
}

fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl ShimConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShimError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// The native server's base URL without a trailing slash.
    pub fn effective_base_url(&self) -> Result<String> {
        let url = self.native.base_url.trim_end_matches('/');

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ShimError::config(format!(
                "native.base_url must start with http:// or https://, got '{}'",
                self.native.base_url
            )));
        }

        Ok(url.to_string())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("openai-compat.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("openai-compat")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("openai-compat").join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join("openai-compat").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".openai-compat.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[native]
base_url = "http://gpu-box:11434/"
connect_timeout_secs = 60
"#
        )
        .unwrap();

        let config = ShimConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.native.connect_timeout_secs, 60);
        assert_eq!(config.effective_base_url().unwrap(), "http://gpu-box:11434");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = ShimConfig::load(f.path()).unwrap();

        assert_eq!(config.port, 11435);
        assert_eq!(config.native.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.native.connect_timeout_secs, 10);
        assert_eq!(config.bind_addr(), "127.0.0.1:11435");
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = ShimConfig::find_and_load(Some(Path::new("/nonexistent/openai-compat.toml")))
            .unwrap_err();
        assert!(matches!(err, ShimError::Config { .. }));
    }

    #[test]
    fn test_base_url_requires_scheme() {
        let config = ShimConfig {
            native: NativeConfig {
                base_url: "localhost:11434".to_string(),
                connect_timeout_secs: 10,
            },
            ..ShimConfig::default()
        };

        assert!(config.effective_base_url().is_err());
    }

    #[test]
    fn test_legacy_timeout_key_is_accepted() {
        let config: ShimConfig = toml::from_str("[native]\ntimeout_secs = 7\n").unwrap();
        assert_eq!(config.native.connect_timeout_secs, 7);
    }
}
