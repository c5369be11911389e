//! Server settings read from the environment
//!
//! Every setting has a default so a bare `sheetchart` starts a local
//! development server. Defaults are logged at `info`, anything that falls
//! back because of a bad value is logged at `warn`.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

use crate::graph::GraphOptions;

/// Ten MiB, the largest workbook accepted for ingest
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read secret file {path}: {source}")]
    Secret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where uploads are kept
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; lost on restart
    Memory,
    /// Compressed files under `DATA_DIR`
    Disk,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "disk" => Ok(StoreBackend::Disk),
            other => Err(format!("expected 'memory' or 'disk', got '{other}'")),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorsConfig {
    /// Exact origin allowed to call the API; `None` allows any origin
    pub origin: Option<String>,
    /// Whether browsers may send cookies cross-origin
    pub credentials: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub public_dir: PathBuf,
    pub public_url: String,
    pub store_backend: StoreBackend,
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
    pub graph: GraphOptions,
    pub cors: CorsConfig,
}

impl Config {
    /// Read settings from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns `None` for unset keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let graph = GraphOptions {
            width: vars.parse_or("CHART_WIDTH", 600)?,
            height: vars.parse_or("CHART_HEIGHT", 400)?,
        };

        let cors = CorsConfig {
            origin: vars.get("CORS_ORIGIN"),
            credentials: vars.parse_or("CORS_CREDENTIALS", false)?,
        };
        if cors.credentials && cors.origin.is_none() {
            warn!("CORS_CREDENTIALS is set without CORS_ORIGIN; credentials will not be allowed");
        }

        Ok(Config {
            host: vars.string_or("HOST", "127.0.0.1"),
            port: vars.parse_or("PORT", 3000)?,
            data_dir: vars.string_or("DATA_DIR", "data").into(),
            public_dir: vars.string_or("PUBLIC_DIR", "public").into(),
            public_url: vars
                .string_or("PUBLIC_URL", "/uploads")
                .trim_end_matches('/')
                .to_string(),
            store_backend: vars.parse_or("STORE_BACKEND", StoreBackend::Memory)?,
            jwt_secret: jwt_secret(&vars)?,
            max_upload_bytes: vars.parse_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            graph,
            cors,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        match self.get(key) {
            None => {
                info!("{key} not set, using default: {default}");
                Ok(default)
            }
            Some(value) => value.parse().map_err(|e: T::Err| {
                warn!("Invalid {key} value: {e}");
                ConfigError::Invalid {
                    key: key.to_string(),
                    reason: e.to_string(),
                    value,
                }
            }),
        }
    }
}

impl Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::Disk => f.write_str("disk"),
        }
    }
}

fn jwt_secret<F: Fn(&str) -> Option<String>>(vars: &Vars<'_, F>) -> Result<String, ConfigError> {
    if let Some(secret) = vars.get("JWT_SECRET") {
        return Ok(secret);
    }

    if let Some(path) = vars.get("JWT_SECRET_FILE") {
        let path = PathBuf::from(path);
        return std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|source| ConfigError::Secret { path, source });
    }

    warn!("JWT_SECRET not set, generating a throwaway secret; tokens will not survive a restart");
    Ok(uuid::Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.address(), "127.0.0.1:3000");
        assert_eq!(config.public_url, "/uploads");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.graph, GraphOptions::default());
        assert_eq!(config.cors, CorsConfig::default());
        assert!(!config.jwt_secret.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "8080"),
            ("STORE_BACKEND", "Disk"),
            ("PUBLIC_URL", "https://cdn.example.com/uploads/"),
            ("JWT_SECRET", " shh "),
            ("CHART_WIDTH", "800"),
            ("CORS_ORIGIN", "http://localhost:5173"),
            ("CORS_CREDENTIALS", "true"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Disk);
        assert_eq!(config.public_url, "https://cdn.example.com/uploads");
        assert_eq!(config.jwt_secret, "shh");
        assert_eq!(config.graph.width, 800);
        assert_eq!(config.graph.height, 400);
        assert_eq!(config.cors.origin.as_deref(), Some("http://localhost:5173"));
        assert!(config.cors.credentials);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(matches!(
            config(&[("PORT", "eighty")]),
            Err(ConfigError::Invalid { key, .. }) if key == "PORT"
        ));
        assert!(matches!(
            config(&[("STORE_BACKEND", "redis")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_secret_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let config = config(&[("JWT_SECRET_FILE", &path)]).unwrap();
        assert_eq!(config.jwt_secret, "from-file");

        assert!(matches!(
            self::config(&[("JWT_SECRET_FILE", "/definitely/not/here")]),
            Err(ConfigError::Secret { .. })
        ));
    }
}
