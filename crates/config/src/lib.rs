//! Configuration for the tlsinit certificate bootstrapper.
//!
//! Configuration is written in [KDL](https://kdl.dev). Every section and
//! every field is optional; anything omitted takes the built-in default,
//! which is itself shipped as an embedded KDL document (`default.kdl`).
//!
//! ```kdl
//! defaults {
//!     domain "chemi.vn"
//!     email "admin@chemi.vn"
//! }
//!
//! port-guard {
//!     port 80
//!     containers "chemi-proxy" "nginx"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

mod error;
mod parse;
pub mod validate;

pub use error::ConfigError;
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Embedded default configuration
const DEFAULT_CONFIG_KDL: &str = include_str!("../default.kdl");

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TLSINIT_CONFIG";

// ============================================================================
// Top-level configuration
// ============================================================================

/// Complete bootstrapper configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Config {
    /// Domain and email used when none are given on the command line
    pub defaults: DefaultsConfig,
    /// Host filesystem layout
    pub paths: PathsConfig,
    /// Port 80 clearing policy
    pub port_guard: PortGuardConfig,
    /// Temporary challenge responder
    pub responder: ResponderConfig,
    /// External certificate issuer
    pub issuer: IssuerConfig,
    /// Container runtime
    pub runtime: RuntimeConfig,
    /// Generated proxy configuration and service topology
    pub topology: TopologyConfig,
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_kdl_str(&content)?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Parse configuration from a KDL document
    pub fn from_kdl_str(content: &str) -> Result<Self, ConfigError> {
        parse::parse_document(content)
    }

    /// Parse the embedded default configuration
    pub fn default_embedded() -> Result<Self, ConfigError> {
        debug!("Parsing embedded default configuration");
        Self::from_kdl_str(DEFAULT_CONFIG_KDL)
    }

    /// Load from an explicit path, the `TLSINIT_CONFIG` variable, or the
    /// embedded defaults, in that order of priority
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(path),
            None => Self::default_embedded(),
        }
    }

    /// Run semantic validation
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        result.merge(validate::validate_defaults(self));
        result.merge(validate::validate_paths(self));
        result.merge(validate::validate_network(self));
        result.merge(validate::validate_topology(self));
        result
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Fallback domain and contact email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultsConfig {
    pub domain: String,
    pub email: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            domain: "chemi.vn".to_string(),
            email: "admin@chemi.vn".to_string(),
        }
    }
}

/// Host filesystem layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
    /// Issuer configuration root; bundles live under `live/<domain>/`
    pub letsencrypt_dir: PathBuf,
    /// Webroot shared by the challenge responder and the issuer
    pub webroot: PathBuf,
    /// Generated reverse-proxy configuration
    pub proxy_config: PathBuf,
    /// Generated service topology
    pub service_topology: PathBuf,
    /// Scratch directory for the responder's own configuration
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            letsencrypt_dir: PathBuf::from("./certbot/conf"),
            webroot: PathBuf::from("./certbot/www"),
            proxy_config: PathBuf::from("./nginx/nginx.conf"),
            service_topology: PathBuf::from("./docker-compose.yml"),
            state_dir: PathBuf::from("./.tlsinit"),
        }
    }
}

/// Policy for freeing the challenge port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortGuardConfig {
    /// Port the challenge responder must own
    pub port: u16,
    /// Containers known to bind the port
    pub containers: Vec<String>,
    /// Wait after stopping anything, so the socket is released
    pub grace_period_secs: u64,
    /// Probe the port with a bind after stopping
    pub verify_port_free: bool,
}

impl PortGuardConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl Default for PortGuardConfig {
    fn default() -> Self {
        Self {
            port: 80,
            containers: vec!["chemi-proxy".to_string(), "nginx".to_string()],
            grace_period_secs: 3,
            verify_port_free: true,
        }
    }
}

/// How the challenge responder is hosted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponderMode {
    /// An nginx container started through the container runtime
    #[default]
    Container,
    /// An HTTP server inside this process
    Embedded,
}

impl ResponderMode {
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" => Some(Self::Container),
            "embedded" | "in-process" => Some(Self::Embedded),
            _ => None,
        }
    }
}

/// Temporary challenge responder settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderConfig {
    pub mode: ResponderMode,
    /// Container name (container mode)
    pub name: String,
    /// Container image (container mode)
    pub image: String,
    /// Listen address (embedded mode); its port is the published port in
    /// container mode
    pub bind: String,
    /// How long to wait for the responder to accept connections
    pub readiness_timeout_secs: u64,
}

impl ResponderConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            mode: ResponderMode::Container,
            name: "tlsinit-acme-responder".to_string(),
            image: "nginx:alpine".to_string(),
            bind: "0.0.0.0:80".to_string(),
            readiness_timeout_secs: 15,
        }
    }
}

/// External certificate issuer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerConfig {
    pub image: String,
    /// Use the ACME staging directory
    pub staging: bool,
    /// Key algorithm passed to the issuer (`ecdsa` or `rsa`)
    pub key_type: String,
    /// Certificates expiring within this window are reported as outdated
    pub renew_before_days: u32,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            image: "certbot/certbot".to_string(),
            staging: false,
            key_type: "ecdsa".to_string(),
            renew_before_days: 30,
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub docker_binary: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
        }
    }
}

/// Structural constants for the generated proxy configuration and topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Prefix for container names
    pub project: String,
    pub upstream_name: String,
    pub upstream_port: u16,
    pub health_path: String,
    pub build_context: String,
    pub proxy_image: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub renew_interval_hours: u64,
    pub proxy_reload_hours: u64,
    pub tls_protocols: String,
    pub tls_ciphers: String,
    pub client_max_body_size: String,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            project: "chemi".to_string(),
            upstream_name: "app".to_string(),
            upstream_port: 8000,
            health_path: "/health".to_string(),
            build_context: ".".to_string(),
            proxy_image: "nginx:alpine".to_string(),
            connect_timeout_secs: 60,
            read_timeout_secs: 300,
            renew_interval_hours: 12,
            proxy_reload_hours: 6,
            tls_protocols: "TLSv1.2 TLSv1.3".to_string(),
            tls_ciphers: "HIGH:!aNULL:!MD5".to_string(),
            client_max_body_size: "20M".to_string(),
        }
    }
}
