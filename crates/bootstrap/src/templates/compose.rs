//! docker compose topology rendering.
//!
//! The document is built from typed structs with `BTreeMap` collections so
//! key order, and therefore the output, is stable across runs.

use std::collections::BTreeMap;

use serde::Serialize;
use tlsinit_common::Domain;

use super::TemplateSettings;
use crate::acme::{AcmeError, WEBROOT_MOUNT};

const RESTART_POLICY: &str = "unless-stopped";

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<&'static str, Service>,
}

#[derive(Debug, Default, Serialize)]
struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    container_name: String,
    restart: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    expose: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    depends_on: BTreeMap<String, DependsOn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

#[derive(Debug, Serialize)]
struct DependsOn {
    condition: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthCheck {
    test: Vec<String>,
    interval: &'static str,
    timeout: &'static str,
    retries: u32,
    start_period: &'static str,
}

fn container_name(settings: &TemplateSettings, service: &str) -> String {
    format!("{}-{}", settings.project, service)
}

fn app_service(settings: &TemplateSettings) -> Service {
    let health_url = format!(
        "http://localhost:{}{}",
        settings.upstream_port, settings.health_path
    );
    Service {
        build: Some(settings.build_context.clone()),
        container_name: container_name(settings, &settings.upstream_name),
        restart: RESTART_POLICY,
        expose: vec![settings.upstream_port.to_string()],
        healthcheck: Some(HealthCheck {
            test: vec![
                "CMD".to_string(),
                "curl".to_string(),
                "-f".to_string(),
                health_url,
            ],
            interval: "30s",
            timeout: "10s",
            retries: 3,
            start_period: "20s",
        }),
        ..Service::default()
    }
}

fn proxy_service(settings: &TemplateSettings) -> Service {
    let mut depends_on = BTreeMap::new();
    depends_on.insert(
        settings.upstream_name.clone(),
        DependsOn {
            condition: "service_healthy",
        },
    );

    // Periodic reload picks up certificates renewed by the certbot service
    let command = format!(
        "/bin/sh -c 'while :; do sleep {}h & wait $${{!}}; nginx -s reload; done & nginx -g \"daemon off;\"'",
        settings.proxy_reload_hours
    );

    Service {
        image: Some(settings.proxy_image.clone()),
        container_name: container_name(settings, "proxy"),
        restart: RESTART_POLICY,
        ports: vec!["80:80".to_string(), "443:443".to_string()],
        volumes: vec![
            format!(
                "{}:/etc/nginx/nginx.conf:ro",
                settings.proxy_config_volume
            ),
            format!("{}:/etc/letsencrypt:ro", settings.letsencrypt_volume),
            format!("{}:{}:ro", settings.webroot_volume, WEBROOT_MOUNT),
        ],
        depends_on,
        command: Some(command),
        ..Service::default()
    }
}

fn certbot_service(settings: &TemplateSettings) -> Service {
    let entrypoint = format!(
        "/bin/sh -c 'trap exit TERM; while :; do certbot renew --webroot -w {} || true; sleep {}h & wait $${{!}}; done'",
        WEBROOT_MOUNT, settings.renew_interval_hours
    );

    Service {
        image: Some(settings.certbot_image.clone()),
        container_name: container_name(settings, "certbot"),
        restart: RESTART_POLICY,
        volumes: vec![
            format!("{}:/etc/letsencrypt", settings.letsencrypt_volume),
            format!("{}:{}", settings.webroot_volume, WEBROOT_MOUNT),
        ],
        entrypoint: Some(entrypoint),
        ..Service::default()
    }
}

/// Render the service topology for a domain
pub(super) fn render_topology(
    domain: &Domain,
    settings: &TemplateSettings,
) -> Result<String, AcmeError> {
    let mut services = BTreeMap::new();
    services.insert("app", app_service(settings));
    services.insert("proxy", proxy_service(settings));
    services.insert("certbot", certbot_service(settings));

    let body = serde_yaml::to_string(&ComposeFile { services })?;
    Ok(format!(
        "# Generated by tlsinit for {domain}. Manual changes are overwritten on the next run.\n{body}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render() -> String {
        render_topology(
            &Domain::parse("chemi.vn").unwrap(),
            &TemplateSettings::default(),
        )
        .unwrap()
    }

    fn parsed() -> serde_yaml::Value {
        serde_yaml::from_str(&render()).unwrap()
    }

    #[test]
    fn test_header_names_domain() {
        assert!(render().starts_with("# Generated by tlsinit for chemi.vn."));
    }

    #[test]
    fn test_three_services() {
        let doc = parsed();
        let services = doc["services"].as_mapping().unwrap();

        assert_eq!(services.len(), 3);
        for name in ["app", "proxy", "certbot"] {
            assert!(doc["services"][name].is_mapping(), "missing {name}");
            assert_eq!(doc["services"][name]["restart"], "unless-stopped");
        }
    }

    #[test]
    fn test_app_health_gate() {
        let doc = parsed();
        let app = &doc["services"]["app"];

        assert_eq!(app["expose"][0], "8000");
        assert_eq!(app["healthcheck"]["test"][3], "http://localhost:8000/health");
        assert_eq!(
            doc["services"]["proxy"]["depends_on"]["app"]["condition"],
            "service_healthy"
        );
    }

    #[test]
    fn test_proxy_ports_and_mounts() {
        let doc = parsed();
        let proxy = &doc["services"]["proxy"];

        assert_eq!(proxy["ports"][0], "80:80");
        assert_eq!(proxy["ports"][1], "443:443");
        assert_eq!(proxy["volumes"][0], "./nginx/nginx.conf:/etc/nginx/nginx.conf:ro");
        assert_eq!(proxy["volumes"][1], "./certbot/conf:/etc/letsencrypt:ro");
        assert!(proxy["command"].as_str().unwrap().contains("nginx -s reload"));
        assert!(proxy["command"].as_str().unwrap().contains("sleep 6h"));
    }

    #[test]
    fn test_certbot_renew_loop() {
        let doc = parsed();
        let certbot = &doc["services"]["certbot"];
        let entrypoint = certbot["entrypoint"].as_str().unwrap();

        assert_eq!(certbot["image"], "certbot/certbot");
        assert!(entrypoint.contains("certbot renew"));
        assert!(entrypoint.contains("|| true"));
        assert!(entrypoint.contains("sleep 12h"));
        assert_eq!(certbot["volumes"][0], "./certbot/conf:/etc/letsencrypt");
    }

    #[test]
    fn test_container_names_use_project() {
        let doc = parsed();
        assert_eq!(doc["services"]["proxy"]["container_name"], "chemi-proxy");
        assert_eq!(doc["services"]["app"]["container_name"], "chemi-app");
    }
}
