//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, idle <= open)
//! - Check that DSNs and descriptors are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;
use url::Url;

use crate::config::schema::{DatabaseOptions, RuntimeConfig};
use crate::source::descriptor::Descriptor;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate runtime settings.
pub fn validate_settings(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !config.source.descriptor.trim().is_empty() {
        if let Err(e) = Descriptor::parse(&config.source.descriptor) {
            errors.push(ValidationError::new("source.descriptor", e.to_string()));
        }
    }
    if config.source.channel_capacity == 0 {
        errors.push(ValidationError::new("source.channel_capacity", "must be greater than 0"));
    }
    if config.source.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("source.connect_timeout_ms", "must be greater than 0"));
    }

    if config.reconnect.enabled {
        if config.reconnect.max_attempts == 0 {
            errors.push(ValidationError::new("reconnect.max_attempts", "must be greater than 0"));
        }
        if config.reconnect.base_delay_ms > config.reconnect.max_delay_ms {
            errors.push(ValidationError::new(
                "reconnect.base_delay_ms",
                "must not exceed reconnect.max_delay_ms",
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the options for one named database.
pub fn validate_database_options(options: &DatabaseOptions) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if options.dsn.trim().is_empty() {
        errors.push(ValidationError::new("dsn", "must not be empty"));
    } else if let Err(e) = Url::parse(&options.dsn) {
        errors.push(ValidationError::new("dsn", format!("not a URL-form DSN: {}", e)));
    }

    if options.max_open_connections == 0 {
        errors.push(ValidationError::new("max_open_connections", "must be greater than 0"));
    }
    if options.max_idle_connections > options.max_open_connections {
        errors.push(ValidationError::new(
            "max_idle_connections",
            "must not exceed max_open_connections",
        ));
    }
    if options.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("connect_timeout_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        assert!(validate_settings(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn test_settings_collects_all_errors() {
        let mut config = RuntimeConfig::default();
        config.source.descriptor = "no-scheme-here".into();
        config.source.channel_capacity = 0;
        config.reconnect.enabled = true;
        config.reconnect.max_attempts = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_settings(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "source.descriptor",
                "source.channel_capacity",
                "reconnect.max_attempts",
                "observability.metrics_address",
            ]
        );
    }

    #[test]
    fn test_database_options() {
        let options = DatabaseOptions {
            dsn: "postgres://app@db:5432/tenant".into(),
            ..Default::default()
        };
        assert!(validate_database_options(&options).is_ok());

        let bad = DatabaseOptions {
            dsn: String::new(),
            max_open_connections: 4,
            max_idle_connections: 8,
            ..Default::default()
        };
        let errors = validate_database_options(&bad).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "dsn: must not be empty");
    }
}
