//! Recognized host settings and the [`HostOptions`] snapshot derived from them.
//!
//! Only the keys listed in [`keys`] are interpreted by the host. Anything else
//! stays in the [`Configuration`] for downstream consumers (servers, startup
//! code).

use std::path::PathBuf;

use serde::Serialize;

use crate::config::settings::{parse_bool, Configuration};

/// Setting keys understood by the host.
pub mod keys {
    /// Environment name (`Development`, `Staging`, `Production`, ...).
    pub const ENVIRONMENT: &str = "environment";
    /// Application name override.
    pub const APPLICATION: &str = "application";
    /// Server location: the name a [`ServerLoader`](crate::server::ServerLoader) resolves.
    pub const SERVER: &str = "server";
    /// `;`-separated list of urls the server binds.
    pub const URLS: &str = "server.urls";
    pub const CAPTURE_STARTUP_ERRORS: &str = "capture_startup_errors";
    /// Application base path; overrides the detected one.
    pub const BASE_PATH: &str = "base_path";
    /// Web root, relative to the content root.
    pub const WEBROOT: &str = "webroot";
    /// Startup assembly name looked up in the startup registry.
    pub const STARTUP: &str = "startup";
    /// Prometheus exporter bind address (binary only).
    pub const METRICS_ADDRESS: &str = "metrics.address";
}

/// Prefix for host settings read from environment variables.
pub const ENV_PREFIX: &str = "APPHOST_";

pub const DEFAULT_ENVIRONMENT: &str = "Production";
pub const DEFAULT_URLS: &str = "http://127.0.0.1:5000";
pub const DEFAULT_WEBROOT: &str = "wwwroot";

/// Immutable snapshot of the recognized host settings.
///
/// Built once per [`HostBuilder::build`](crate::hosting::HostBuilder::build)
/// and shared via `Arc` afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOptions {
    pub environment: String,
    pub application: Option<String>,
    pub server: Option<String>,
    pub urls: Vec<String>,
    pub capture_startup_errors: bool,
    pub base_path: Option<PathBuf>,
    pub webroot: String,
    pub startup: Option<String>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            application: None,
            server: None,
            urls: vec![DEFAULT_URLS.to_string()],
            capture_startup_errors: true,
            base_path: None,
            webroot: DEFAULT_WEBROOT.to_string(),
            startup: None,
        }
    }
}

impl HostOptions {
    pub fn from_configuration(config: &Configuration) -> Self {
        let defaults = Self::default();

        let capture_startup_errors = match config.get(keys::CAPTURE_STARTUP_ERRORS) {
            None => defaults.capture_startup_errors,
            Some(raw) => parse_bool(raw).unwrap_or_else(|| {
                tracing::warn!(
                    key = keys::CAPTURE_STARTUP_ERRORS,
                    value = raw,
                    "Unrecognized boolean value, keeping default"
                );
                defaults.capture_startup_errors
            }),
        };

        let urls = configured_urls(config);

        Self {
            environment: non_blank(config.get(keys::ENVIRONMENT))
                .map(str::to_string)
                .unwrap_or(defaults.environment),
            application: non_blank(config.get(keys::APPLICATION)).map(str::to_string),
            server: non_blank(config.get(keys::SERVER)).map(str::to_string),
            urls,
            capture_startup_errors,
            base_path: non_blank(config.get(keys::BASE_PATH)).map(PathBuf::from),
            webroot: non_blank(config.get(keys::WEBROOT))
                .map(str::to_string)
                .unwrap_or(defaults.webroot),
            startup: non_blank(config.get(keys::STARTUP)).map(str::to_string),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Urls from the `server.urls` setting, or the default url.
pub fn configured_urls(config: &Configuration) -> Vec<String> {
    let urls: Vec<String> = config
        .get(keys::URLS)
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect();

    if urls.is_empty() {
        vec![DEFAULT_URLS.to_string()]
    } else {
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let options = HostOptions::from_configuration(&Configuration::new());
        assert_eq!(options, HostOptions::default());
        assert!(options.capture_startup_errors);
        assert_eq!(options.environment, "Production");
    }

    #[test]
    fn recognized_keys() {
        let config: Configuration = [
            ("Environment", "Development"),
            ("server", "hyper"),
            ("server.urls", "http://127.0.0.1:1; http://127.0.0.1:2;"),
            ("capture_startup_errors", "off"),
            ("base_path", "/srv/app"),
            ("startup", "shop"),
            ("unrelated", "kept elsewhere"),
        ]
        .into_iter()
        .collect();

        let options = HostOptions::from_configuration(&config);
        assert_eq!(options.environment, "Development");
        assert_eq!(options.server.as_deref(), Some("hyper"));
        assert_eq!(options.urls, vec!["http://127.0.0.1:1", "http://127.0.0.1:2"]);
        assert!(!options.capture_startup_errors);
        assert_eq!(options.base_path, Some(PathBuf::from("/srv/app")));
        assert_eq!(options.startup.as_deref(), Some("shop"));
    }

    #[test]
    fn invalid_boolean_keeps_default() {
        let config: Configuration = [("capture_startup_errors", "sometimes")].into_iter().collect();
        assert!(HostOptions::from_configuration(&config).capture_startup_errors);
    }
}
