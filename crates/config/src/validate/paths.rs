//! Filesystem layout validation

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;

/// Validate configured paths
pub fn validate_paths(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let paths = &config.paths;

    if paths.proxy_config == paths.service_topology {
        result.add_error(ValidationError::new(
            ErrorCategory::Paths,
            format!(
                "Proxy configuration and service topology share the path {:?}",
                paths.proxy_config
            ),
        ));
    }

    for (name, path) in [
        ("proxy-config", &paths.proxy_config),
        ("service-topology", &paths.service_topology),
    ] {
        if path.file_name().is_none() {
            result.add_error(ValidationError::new(
                ErrorCategory::Paths,
                format!("'{}' must name a file, got {:?}", name, path),
            ));
        }
    }

    if paths.webroot.starts_with(&paths.letsencrypt_dir) {
        result.add_warning(ValidationWarning::new(format!(
            "Webroot {:?} lives inside the issuer directory {:?}",
            paths.webroot, paths.letsencrypt_dir
        )));
    }

    result
}
