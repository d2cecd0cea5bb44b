//! nginx configuration rendering.

use std::fmt::Display;

use tlsinit_common::Domain;

use super::{TemplateSettings, RESPONDER_BODY};
use crate::acme::{ACME_CHALLENGE_PREFIX, WEBROOT_MOUNT};

/// Where the issuer's directory is mounted in the proxy container
const LETSENCRYPT_MOUNT: &str = "/etc/letsencrypt";

/// Indenting writer for nginx's block syntax
struct ConfWriter {
    out: String,
    depth: usize,
}

impl ConfWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            depth: 0,
        }
    }

    fn line(&mut self, text: impl Display) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
        self.out.push_str(&text.to_string());
        self.out.push('\n');
    }

    fn directive(&mut self, text: impl Display) {
        self.line(format!("{text};"));
    }

    fn open(&mut self, header: impl Display) {
        self.line(format!("{header} {{"));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Challenge passthrough, shared by the permanent and temporary configs
fn challenge_location(w: &mut ConfWriter) {
    w.open(format!("location {ACME_CHALLENGE_PREFIX}"));
    w.directive(format!("root {WEBROOT_MOUNT}"));
    w.directive("default_type text/plain");
    w.close();
}

/// Render the permanent reverse-proxy configuration
pub(super) fn render_proxy_config(domain: &Domain, settings: &TemplateSettings) -> String {
    let upstream = &settings.upstream_name;
    let live = format!("{LETSENCRYPT_MOUNT}/live/{domain}");
    let mut w = ConfWriter::new();

    w.line(format!(
        "# Generated by tlsinit for {domain}. Manual changes are overwritten on the next run."
    ));
    w.open("events");
    w.directive("worker_connections 1024");
    w.close();
    w.blank();

    w.open("http");
    w.directive("include /etc/nginx/mime.types");
    w.directive("default_type application/octet-stream");
    w.directive("sendfile on");
    w.directive("keepalive_timeout 65");
    w.directive("server_tokens off");
    w.blank();

    w.open("map $http_upgrade $connection_upgrade");
    w.directive("default upgrade");
    w.directive("'' close");
    w.close();
    w.blank();

    w.open(format!("upstream {upstream}"));
    w.directive(format!("server {upstream}:{}", settings.upstream_port));
    w.close();
    w.blank();

    // Plain HTTP: challenges stay reachable for unattended renewals,
    // everything else is redirected
    w.open("server");
    w.directive("listen 80");
    w.directive("listen [::]:80");
    w.directive(format!("server_name {domain}"));
    w.blank();
    challenge_location(&mut w);
    w.blank();
    w.open("location /");
    w.directive("return 301 https://$host$request_uri");
    w.close();
    w.close();
    w.blank();

    w.open("server");
    w.directive("listen 443 ssl");
    w.directive("listen [::]:443 ssl");
    w.directive("http2 on");
    w.directive(format!("server_name {domain}"));
    w.blank();
    w.directive(format!("ssl_certificate {live}/fullchain.pem"));
    w.directive(format!("ssl_certificate_key {live}/privkey.pem"));
    w.directive(format!("ssl_protocols {}", settings.tls_protocols));
    w.directive(format!("ssl_ciphers {}", settings.tls_ciphers));
    w.directive("ssl_prefer_server_ciphers on");
    w.directive("ssl_session_cache shared:SSL:10m");
    w.directive("ssl_session_timeout 10m");
    w.blank();
    w.directive(format!("client_max_body_size {}", settings.client_max_body_size));
    w.blank();
    w.open("location /");
    w.directive(format!("proxy_pass http://{upstream}"));
    w.directive("proxy_http_version 1.1");
    w.directive("proxy_set_header Host $host");
    w.directive("proxy_set_header X-Real-IP $remote_addr");
    w.directive("proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for");
    w.directive("proxy_set_header X-Forwarded-Proto $scheme");
    w.directive("proxy_set_header Upgrade $http_upgrade");
    w.directive("proxy_set_header Connection $connection_upgrade");
    w.directive(format!("proxy_connect_timeout {}s", settings.connect_timeout_secs));
    w.directive(format!("proxy_send_timeout {}s", settings.read_timeout_secs));
    w.directive(format!("proxy_read_timeout {}s", settings.read_timeout_secs));
    w.close();
    w.close();

    w.close();
    w.finish()
}

/// Render the server block used by the temporary challenge responder.
///
/// Mounted as `conf.d/default.conf` of a stock nginx image, so it contains
/// a single `server` and no `http` wrapper.
pub fn render_challenge_config() -> String {
    let mut w = ConfWriter::new();

    w.line("# Temporary ACME challenge responder generated by tlsinit.");
    w.open("server");
    w.directive("listen 80");
    w.directive("listen [::]:80");
    w.directive("server_name _");
    w.blank();
    challenge_location(&mut w);
    w.blank();
    w.open("location /");
    w.directive("default_type text/plain");
    w.directive(format!("return 200 '{RESPONDER_BODY}'"));
    w.close();
    w.close();

    w.finish()
}
