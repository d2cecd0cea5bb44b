//! Network settings validation
//!
//! Checks the challenge port and the responder's listen address.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::net::SocketAddr;

/// Validate port guard and responder addresses
pub fn validate_network(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let port = config.port_guard.port;

    if port == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            "Challenge port must be non-zero",
        ));
    } else if port != 80 {
        result.add_warning(ValidationWarning::new(format!(
            "Challenge port is {} - ACME HTTP-01 validation always connects to port 80, \
             so this only works behind a port forward",
            port
        )));
    }

    for name in &config.port_guard.containers {
        if name.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Network,
                "Port guard container names must not be empty",
            ));
        }
    }

    match config.responder.bind.parse::<SocketAddr>() {
        Ok(addr) if addr.port() != port => {
            result.add_warning(ValidationWarning::new(format!(
                "Responder binds {} but the challenge port is {}",
                addr, port
            )));
        }
        Ok(_) => {}
        Err(e) => {
            result.add_error(ValidationError::new(
                ErrorCategory::Network,
                format!(
                    "Responder bind address '{}' is invalid: {}",
                    config.responder.bind, e
                ),
            ));
        }
    }

    if config.responder.readiness_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Network,
            "Responder readiness timeout must be at least 1 second",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_bind_address() {
        let mut config = Config::default();
        config.responder.bind = "not-an-address".to_string();

        let result = validate_network(&config);

        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Responder bind address")));
    }

    #[test]
    fn test_port_mismatch_warns() {
        let mut config = Config::default();
        config.responder.bind = "0.0.0.0:8080".to_string();

        let result = validate_network(&config);

        assert!(result.is_valid());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("challenge port is 80")));
    }

    #[test]
    fn test_zero_port_is_error() {
        let mut config = Config::default();
        config.port_guard.port = 0;

        let result = validate_network(&config);

        assert!(!result.is_valid());
    }
}
