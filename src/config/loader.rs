//! Configuration sources: files, environment variables and command-line pairs.
//!
//! Every source produces a flat [`Configuration`]. Nested tables/objects are
//! flattened into dotted keys (`server.urls`), array items get their index as
//! the last segment (`hosts.0`).

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::settings::Configuration;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported configuration file extension: {0}")]
    UnsupportedFormat(String),
}

/// Load a configuration file. The format is picked from the extension
/// (`.toml` or `.json`).
pub fn load_config(path: &Path) -> Result<Configuration, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let config = match extension.as_str() {
        "toml" => parse_toml(&content)?,
        "json" => parse_json(&content)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };

    tracing::debug!(path = %path.display(), keys = config.len(), "Configuration file loaded");
    Ok(config)
}

pub fn parse_toml(content: &str) -> Result<Configuration, ConfigError> {
    let table: toml::Table = toml::from_str(content)?;
    let mut config = Configuration::new();
    for (key, value) in &table {
        flatten_toml(key, value, &mut config);
    }
    Ok(config)
}

pub fn parse_json(content: &str) -> Result<Configuration, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let mut config = Configuration::new();
    match &value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                flatten_json(key, value, &mut config);
            }
        }
        other => flatten_json("", other, &mut config),
    }
    Ok(config)
}

/// Read environment variables that start with `prefix`.
///
/// The prefix is stripped, the remainder lowercased and `__` mapped to `.`,
/// so `APPHOST_SERVER__URLS` becomes `server.urls`.
pub fn from_env(prefix: &str) -> Configuration {
    from_env_vars(std::env::vars(), prefix)
}

/// Same as [`from_env`] over an explicit variable list.
pub fn from_env_vars<I, K, V>(vars: I, prefix: &str) -> Configuration
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let prefix = prefix.to_ascii_lowercase();
    let mut config = Configuration::new();
    for (name, value) in vars {
        let name = name.as_ref().to_ascii_lowercase();
        if let Some(rest) = name.strip_prefix(&prefix) {
            if rest.is_empty() {
                continue;
            }
            config.set(rest.replace("__", "."), value);
        }
    }
    config
}

/// Collect `--key value` and `--key=value` pairs. A flag followed by another
/// flag (or by nothing) gets the value `true`. Positional tokens are ignored.
pub fn from_args<I, S>(args: I) -> Configuration
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
    let mut config = Configuration::new();
    let mut i = 0;
    while i < args.len() {
        let Some(flag) = args[i].strip_prefix("--") else {
            i += 1;
            continue;
        };

        if let Some((key, value)) = flag.split_once('=') {
            config.set(key, value);
            i += 1;
        } else if let Some(value) = args.get(i + 1).filter(|next| !next.starts_with("--")) {
            config.set(flag, value.as_str());
            i += 2;
        } else {
            config.set(flag, "true");
            i += 1;
        }
    }
    config
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn flatten_toml(prefix: &str, value: &toml::Value, config: &mut Configuration) {
    match value {
        toml::Value::Table(table) => {
            for (key, value) in table {
                flatten_toml(&join_key(prefix, key), value, config);
            }
        }
        toml::Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_toml(&join_key(prefix, &index.to_string()), value, config);
            }
        }
        toml::Value::String(s) => {
            config.set(prefix, s.as_str());
        }
        other => {
            config.set(prefix, other.to_string());
        }
    }
}

fn flatten_json(prefix: &str, value: &serde_json::Value, config: &mut Configuration) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                flatten_json(&join_key(prefix, key), value, config);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_json(&join_key(prefix, &index.to_string()), value, config);
            }
        }
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => {
            config.set(prefix, s.as_str());
        }
        other => {
            config.set(prefix, other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_tables_are_flattened() {
        let config = parse_toml(
            r#"
            environment = "Staging"
            capture_startup_errors = false

            [server]
            urls = "http://127.0.0.1:0"
            ports = [1, 2]
            "#,
        )
        .unwrap();

        assert_eq!(config.get("environment"), Some("Staging"));
        assert_eq!(config.get("capture_startup_errors"), Some("false"));
        assert_eq!(config.get("server.urls"), Some("http://127.0.0.1:0"));
        assert_eq!(config.get("server.ports.1"), Some("2"));
    }

    #[test]
    fn json_objects_are_flattened() {
        let config = parse_json(r#"{"Server": {"Urls": "http://x"}, "skip": null, "n": 3}"#).unwrap();
        assert_eq!(config.get("server.urls"), Some("http://x"));
        assert_eq!(config.get("n"), Some("3"));
        assert!(!config.contains_key("skip"));
    }

    #[test]
    fn env_vars_strip_prefix() {
        let vars = vec![
            ("APPHOST_ENVIRONMENT", "Development"),
            ("APPHOST_SERVER__URLS", "http://localhost:1"),
            ("PATH", "/usr/bin"),
        ];
        let config = from_env_vars(vars, "APPHOST_");
        assert_eq!(config.get("environment"), Some("Development"));
        assert_eq!(config.get("server.urls"), Some("http://localhost:1"));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn args_pairs() {
        let config = from_args([
            "run",
            "--server.urls",
            "http://localhost:5001",
            "--server=hyper",
            "--verbose",
            "--environment",
            "Development",
        ]);
        assert_eq!(config.get("server.urls"), Some("http://localhost:5001"));
        assert_eq!(config.get("server"), Some("hyper"));
        assert_eq!(config.get("verbose"), Some("true"));
        assert_eq!(config.get("environment"), Some("Development"));
    }

    #[test]
    fn load_config_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosting.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server = \"axum\"").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.get("server"), Some("axum"));

        let bad = dir.path().join("hosting.ini");
        std::fs::write(&bad, "x=1").unwrap();
        assert!(matches!(load_config(&bad), Err(ConfigError::UnsupportedFormat(_))));
    }
}
