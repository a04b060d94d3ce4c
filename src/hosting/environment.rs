//! Hosting and application environment descriptors.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::{HostOptions, DEFAULT_ENVIRONMENT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("hosting environment is already initialized")]
    AlreadyInitialized,
}

/// Where the application lives and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationEnvironment {
    application_name: String,
    application_base_path: PathBuf,
}

impl ApplicationEnvironment {
    pub fn new(application_name: impl Into<String>, application_base_path: impl Into<PathBuf>) -> Self {
        Self {
            application_name: application_name.into(),
            application_base_path: application_base_path.into(),
        }
    }

    /// Name from the running executable, base path from the working directory.
    pub fn detect() -> Self {
        let application_name = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let application_base_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(application_name, application_base_path)
    }

    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.application_base_path = path.into();
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn application_base_path(&self) -> &Path {
        &self.application_base_path
    }
}

/// Environment the host runs in. Created empty by the builder and
/// initialized exactly once during `build`.
#[derive(Debug, Clone)]
pub struct HostingEnvironment {
    environment_name: String,
    application_name: String,
    content_root: PathBuf,
    web_root: PathBuf,
    initialized: bool,
}

impl Default for HostingEnvironment {
    fn default() -> Self {
        Self {
            environment_name: DEFAULT_ENVIRONMENT.to_string(),
            application_name: String::new(),
            content_root: PathBuf::new(),
            web_root: PathBuf::new(),
            initialized: false,
        }
    }
}

impl HostingEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(
        &mut self,
        application: &ApplicationEnvironment,
        options: &HostOptions,
    ) -> Result<(), EnvironmentError> {
        if self.initialized {
            return Err(EnvironmentError::AlreadyInitialized);
        }

        self.environment_name = options.environment.clone();
        self.application_name = application.application_name().to_string();
        self.content_root = application.application_base_path().to_path_buf();
        self.web_root = self.content_root.join(&options.webroot);
        self.initialized = true;

        tracing::debug!(
            environment = %self.environment_name,
            content_root = %self.content_root.display(),
            "Hosting environment initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    pub fn web_root(&self) -> &Path {
        &self.web_root
    }

    /// Case-insensitive environment name comparison.
    pub fn is_environment(&self, name: &str) -> bool {
        self.environment_name.eq_ignore_ascii_case(name)
    }

    pub fn is_development(&self) -> bool {
        self.is_environment("Development")
    }

    pub fn is_production(&self) -> bool {
        self.is_environment("Production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_once() {
        let app = ApplicationEnvironment::new("shop", "/srv/shop");
        let options = HostOptions {
            environment: "development".into(),
            ..HostOptions::default()
        };

        let mut env = HostingEnvironment::new();
        assert!(!env.is_initialized());
        env.initialize(&app, &options).unwrap();

        assert!(env.is_development());
        assert!(!env.is_production());
        assert_eq!(env.application_name(), "shop");
        assert_eq!(env.content_root(), Path::new("/srv/shop"));
        assert_eq!(env.web_root(), Path::new("/srv/shop/wwwroot"));

        assert_eq!(
            env.initialize(&app, &options),
            Err(EnvironmentError::AlreadyInitialized)
        );
    }

    #[test]
    fn base_path_override() {
        let app = ApplicationEnvironment::detect().with_base_path("/opt/app");
        assert_eq!(app.application_base_path(), Path::new("/opt/app"));
        assert!(!app.application_name().is_empty());
    }
}
