//! Host option validation.
//!
//! # Responsibilities
//! - Semantic checks on [`HostOptions`] (parsing is handled by the schema)
//! - Validate every server url (scheme, host)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: `&HostOptions → Result<(), Vec<ValidationError>>`
//! - Runs inside `build`, before any service is registered

use thiserror::Error;
use url::Url;

use crate::config::schema::HostOptions;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("environment name must not be blank")]
    BlankEnvironment,

    #[error("invalid server url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub fn validate_options(options: &HostOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.environment.trim().is_empty() {
        errors.push(ValidationError::BlankEnvironment);
    }

    for raw in &options.urls {
        if let Err(reason) = check_url(raw) {
            errors.push(ValidationError::InvalidUrl {
                url: raw.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme `{other}`")),
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        assert!(validate_options(&HostOptions::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let options = HostOptions {
            environment: "  ".into(),
            urls: vec!["ftp://localhost".into(), "not a url".into(), "http://127.0.0.1:0".into()],
            ..HostOptions::default()
        };
        let errors = validate_options(&options).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], ValidationError::BlankEnvironment);
    }
}
