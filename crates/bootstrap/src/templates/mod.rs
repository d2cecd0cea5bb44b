//! Proxy configuration and service topology rendering.
//!
//! Rendering is a pure function of the domain and a fixed set of structural
//! settings: the same inputs always produce byte-identical output, so a
//! re-run after success rewrites exactly the same files.

mod compose;
mod nginx;

use tlsinit_common::Domain;
use tlsinit_config::Config;

use crate::acme::AcmeError;

pub use nginx::render_challenge_config;

/// Body served by the challenge responder outside the challenge path
pub const RESPONDER_BODY: &str = "ok";

/// Structural constants of the generated artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Prefix for container names
    pub project: String,
    pub upstream_name: String,
    pub upstream_port: u16,
    pub health_path: String,
    pub build_context: String,
    pub proxy_image: String,
    pub certbot_image: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub renew_interval_hours: u64,
    pub proxy_reload_hours: u64,
    pub tls_protocols: String,
    pub tls_ciphers: String,
    pub client_max_body_size: String,
    /// Host side of the letsencrypt mount, as written into the topology
    pub letsencrypt_volume: String,
    /// Host side of the webroot mount, as written into the topology
    pub webroot_volume: String,
    /// Host side of the proxy configuration mount, as written into the topology
    pub proxy_config_volume: String,
}

impl TemplateSettings {
    /// Settings from the topology and paths sections.
    ///
    /// Host paths are written as configured, so relative paths are resolved
    /// by the container runtime against the topology file's directory.
    pub fn from_config(config: &Config) -> Self {
        let topology = &config.topology;
        let paths = &config.paths;
        Self {
            project: topology.project.clone(),
            upstream_name: topology.upstream_name.clone(),
            upstream_port: topology.upstream_port,
            health_path: topology.health_path.clone(),
            build_context: topology.build_context.clone(),
            proxy_image: topology.proxy_image.clone(),
            certbot_image: config.issuer.image.clone(),
            connect_timeout_secs: topology.connect_timeout_secs,
            read_timeout_secs: topology.read_timeout_secs,
            renew_interval_hours: topology.renew_interval_hours,
            proxy_reload_hours: topology.proxy_reload_hours,
            tls_protocols: topology.tls_protocols.clone(),
            tls_ciphers: topology.tls_ciphers.clone(),
            client_max_body_size: topology.client_max_body_size.clone(),
            letsencrypt_volume: paths.letsencrypt_dir.display().to_string(),
            webroot_volume: paths.webroot.display().to_string(),
            proxy_config_volume: paths.proxy_config.display().to_string(),
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The two generated artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifacts {
    /// nginx configuration
    pub proxy_config: String,
    /// docker compose document
    pub service_topology: String,
}

/// Render both artifacts for a domain
pub fn render(domain: &Domain, settings: &TemplateSettings) -> Result<RenderedArtifacts, AcmeError> {
    Ok(RenderedArtifacts {
        proxy_config: nginx::render_proxy_config(domain, settings),
        service_topology: compose::render_topology(domain, settings)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let settings = TemplateSettings::default();
        let domain = Domain::parse("chemi.vn").unwrap();

        let first = render(&domain, &settings).unwrap();
        let second = render(&domain, &settings).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_domains_differ_only_in_domain_fields() {
        let settings = TemplateSettings::default();
        let a = render(&Domain::parse("a.example.com").unwrap(), &settings).unwrap();
        let b = render(&Domain::parse("b.example.com").unwrap(), &settings).unwrap();

        assert_ne!(a, b);
        assert_eq!(
            a.proxy_config.replace("a.example.com", "DOMAIN"),
            b.proxy_config.replace("b.example.com", "DOMAIN")
        );
        assert_eq!(
            a.service_topology.replace("a.example.com", "DOMAIN"),
            b.service_topology.replace("b.example.com", "DOMAIN")
        );
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.topology.upstream_port = 9000;
        config.paths.webroot = "/srv/www".into();

        let settings = TemplateSettings::from_config(&config);

        assert_eq!(settings.upstream_port, 9000);
        assert_eq!(settings.webroot_volume, "/srv/www");
        assert_eq!(settings.certbot_image, "certbot/certbot");
    }
}
