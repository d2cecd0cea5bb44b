//! Default inputs and topology constants

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use tlsinit_common::{ContactEmail, Domain};

/// Validate the fallback domain and email
pub fn validate_defaults(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if let Err(e) = Domain::parse(&config.defaults.domain) {
        result.add_error(ValidationError::new(
            ErrorCategory::Defaults,
            format!("Default domain '{}': {}", config.defaults.domain, e),
        ));
    }
    if let Err(e) = ContactEmail::parse(&config.defaults.email) {
        result.add_error(ValidationError::new(ErrorCategory::Defaults, e.to_string()));
    }

    result
}

/// Validate structural constants of the generated artifacts
pub fn validate_topology(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let topology = &config.topology;

    if topology.renew_interval_hours == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Topology,
            "Renewal interval must be at least 1 hour",
        ));
    } else if topology.renew_interval_hours > 24 {
        result.add_warning(ValidationWarning::new(format!(
            "Renewal runs every {} hours; certificates are usually checked twice a day",
            topology.renew_interval_hours
        )));
    }

    if topology.proxy_reload_hours == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Topology,
            "Proxy reload interval must be at least 1 hour",
        ));
    }

    if !topology.health_path.starts_with('/') {
        result.add_error(ValidationError::new(
            ErrorCategory::Topology,
            format!("Health path '{}' must start with '/'", topology.health_path),
        ));
    }

    for (name, value) in [
        ("project", &topology.project),
        ("upstream-name", &topology.upstream_name),
    ] {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            result.add_error(ValidationError::new(
                ErrorCategory::Topology,
                format!("'{}' must be a non-empty service name, got '{}'", name, value),
            ));
        }
    }

    if topology.connect_timeout_secs == 0 || topology.read_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Topology,
            "Upstream timeouts must be at least 1 second",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_default_domain() {
        let mut config = Config::default();
        config.defaults.domain = "not a domain".to_string();

        let result = validate_defaults(&config);

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Defaults);
    }

    #[test]
    fn test_zero_renewal_interval() {
        let mut config = Config::default();
        config.topology.renew_interval_hours = 0;

        assert!(!validate_topology(&config).is_valid());
    }

    #[test]
    fn test_service_name_characters() {
        let mut config = Config::default();
        config.topology.upstream_name = "app server".to_string();

        let result = validate_topology(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("upstream-name")));
    }
}
