//! KDL document parsing.

mod helpers;

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use kdl::{KdlDocument, KdlNode};
use tracing::{trace, warn};

use crate::{
    Config, ConfigError, DefaultsConfig, IssuerConfig, PathsConfig, PortGuardConfig,
    ResponderConfig, ResponderMode, RuntimeConfig, TopologyConfig,
};

use helpers::{get_bool_entry, get_ranged_entry, get_string_entry, get_string_list};

/// Parse a complete configuration document
pub(crate) fn parse_document(content: &str) -> Result<Config, ConfigError> {
    let doc: KdlDocument = content.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        let section = node.name().value();
        trace!(section = %section, "Parsing configuration section");

        let parsed = match section {
            "defaults" => parse_defaults(node, config.defaults.clone()).map(|v| config.defaults = v),
            "paths" => parse_paths(node, config.paths.clone()).map(|v| config.paths = v),
            "port-guard" => {
                parse_port_guard(node, config.port_guard.clone()).map(|v| config.port_guard = v)
            }
            "responder" => {
                parse_responder(node, config.responder.clone()).map(|v| config.responder = v)
            }
            "issuer" => parse_issuer(node, config.issuer.clone()).map(|v| config.issuer = v),
            "runtime" => parse_runtime(node, config.runtime.clone()).map(|v| config.runtime = v),
            "topology" => {
                parse_topology(node, config.topology.clone()).map(|v| config.topology = v)
            }
            other => {
                warn!(section = %other, "Ignoring unknown configuration section");
                Ok(())
            }
        };

        parsed.map_err(|e| ConfigError::Section {
            section: section.to_string(),
            message: format!("{e:#}"),
        })?;
    }

    Ok(config)
}

fn parse_defaults(node: &KdlNode, mut config: DefaultsConfig) -> Result<DefaultsConfig> {
    if let Some(domain) = get_string_entry(node, "domain")? {
        config.domain = domain;
    }
    if let Some(email) = get_string_entry(node, "email")? {
        config.email = email;
    }
    Ok(config)
}

fn parse_paths(node: &KdlNode, mut config: PathsConfig) -> Result<PathsConfig> {
    let path = |name: &str| -> Result<Option<PathBuf>> {
        Ok(get_string_entry(node, name)?.map(PathBuf::from))
    };

    if let Some(p) = path("letsencrypt-dir")? {
        config.letsencrypt_dir = p;
    }
    if let Some(p) = path("webroot")? {
        config.webroot = p;
    }
    if let Some(p) = path("proxy-config")? {
        config.proxy_config = p;
    }
    if let Some(p) = path("service-topology")? {
        config.service_topology = p;
    }
    if let Some(p) = path("state-dir")? {
        config.state_dir = p;
    }

    trace!(
        webroot = %config.webroot.display(),
        proxy_config = %config.proxy_config.display(),
        "Parsed paths"
    );
    Ok(config)
}

fn parse_port_guard(node: &KdlNode, mut config: PortGuardConfig) -> Result<PortGuardConfig> {
    if let Some(port) = get_ranged_entry::<u16>(node, "port")? {
        config.port = port;
    }
    if let Some(containers) = get_string_list(node, "containers")? {
        config.containers = containers;
    }
    if let Some(secs) = get_ranged_entry::<u64>(node, "grace-period-secs")? {
        config.grace_period_secs = secs;
    }
    if let Some(verify) = get_bool_entry(node, "verify-port-free")? {
        config.verify_port_free = verify;
    }

    trace!(
        port = config.port,
        containers = ?config.containers,
        "Parsed port guard"
    );
    Ok(config)
}

fn parse_responder(node: &KdlNode, mut config: ResponderConfig) -> Result<ResponderConfig> {
    if let Some(mode) = get_string_entry(node, "mode")? {
        config.mode = ResponderMode::from_str_loose(&mode).ok_or_else(|| {
            anyhow!(
                "Invalid responder mode '{}'. Valid modes: container, embedded",
                mode
            )
        })?;
    }
    if let Some(name) = get_string_entry(node, "name")? {
        config.name = name;
    }
    if let Some(image) = get_string_entry(node, "image")? {
        config.image = image;
    }
    if let Some(bind) = get_string_entry(node, "bind")? {
        config.bind = bind;
    }
    if let Some(secs) = get_ranged_entry::<u64>(node, "readiness-timeout-secs")? {
        config.readiness_timeout_secs = secs;
    }
    Ok(config)
}

fn parse_issuer(node: &KdlNode, mut config: IssuerConfig) -> Result<IssuerConfig> {
    if let Some(image) = get_string_entry(node, "image")? {
        config.image = image;
    }
    if let Some(staging) = get_bool_entry(node, "staging")? {
        config.staging = staging;
    }
    if let Some(key_type) = get_string_entry(node, "key-type")? {
        match key_type.as_str() {
            "ecdsa" | "rsa" => config.key_type = key_type,
            other => {
                return Err(anyhow!(
                    "Invalid key type '{}'. Valid key types: ecdsa, rsa",
                    other
                ))
            }
        }
    }
    if let Some(days) = get_ranged_entry::<u32>(node, "renew-before-days")? {
        config.renew_before_days = days;
    }
    Ok(config)
}

fn parse_runtime(node: &KdlNode, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
    if let Some(binary) = get_string_entry(node, "docker-binary")? {
        config.docker_binary = binary;
    }
    Ok(config)
}

fn parse_topology(node: &KdlNode, mut config: TopologyConfig) -> Result<TopologyConfig> {
    let strings: [(&str, &mut String); 8] = [
        ("project", &mut config.project),
        ("upstream-name", &mut config.upstream_name),
        ("health-path", &mut config.health_path),
        ("build-context", &mut config.build_context),
        ("proxy-image", &mut config.proxy_image),
        ("tls-protocols", &mut config.tls_protocols),
        ("tls-ciphers", &mut config.tls_ciphers),
        ("client-max-body-size", &mut config.client_max_body_size),
    ];
    for (name, field) in strings {
        if let Some(value) = get_string_entry(node, name)? {
            *field = value;
        }
    }

    if let Some(port) = get_ranged_entry::<u16>(node, "upstream-port")? {
        config.upstream_port = port;
    }

    let durations: [(&str, &mut u64); 4] = [
        ("connect-timeout-secs", &mut config.connect_timeout_secs),
        ("read-timeout-secs", &mut config.read_timeout_secs),
        ("renew-interval-hours", &mut config.renew_interval_hours),
        ("proxy-reload-hours", &mut config.proxy_reload_hours),
    ];
    for (name, field) in durations {
        if let Some(value) = get_ranged_entry::<u64>(node, name)? {
            *field = value;
        }
    }

    if config.upstream_port == 0 {
        return Err(anyhow!("'upstream-port' must be non-zero"));
    }

    trace!(
        project = %config.project,
        upstream = %config.upstream_name,
        upstream_port = config.upstream_port,
        "Parsed topology"
    );
    Ok(config)
}
