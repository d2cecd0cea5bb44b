//! End-to-end bootstrap runs against an in-memory container runtime and a
//! scripted issuer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tlsinit_bootstrap::acme::ResponderState;
use tlsinit_bootstrap::runtime::{ContainerHandle, ContainerSpec, RuntimeError};
use tlsinit_bootstrap::templates::RESPONDER_BODY;
use tlsinit_bootstrap::{
    AcmeError, AssumeYes, Bootstrap, BootstrapOutcome, CertificateIssuer, CertificateState,
    ContainerRuntime, IssueRequest, IssuerError, Stage,
};
use tlsinit_common::{ContactEmail, Domain, StepOutcome};
use tlsinit_config::Config;

const RESPONDER: &str = "tlsinit-acme-responder";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeRuntime {
    running: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    /// Containers that refuse to stop
    stubborn: Vec<String>,
    fail_run: bool,
}

impl FakeRuntime {
    fn with_running(names: &[&str]) -> Self {
        Self {
            running: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn running(&self, name: &str) -> bool {
        self.running.lock().iter().any(|r| r == name)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn stop(&self, name: &str) -> Result<StepOutcome, RuntimeError> {
        self.calls.lock().push(format!("stop {name}"));
        if self.stubborn.iter().any(|s| s == name) {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker rm -f {name}"),
                status: "exit status: 1".into(),
                stderr: "cannot kill container".into(),
            });
        }
        let mut running = self.running.lock();
        match running.iter().position(|r| r == name) {
            Some(i) => {
                running.remove(i);
                Ok(StepOutcome::Done)
            }
            None => Ok(StepOutcome::AlreadyDone),
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.calls.lock().push(format!("run {}", spec.name));
        if self.fail_run {
            return Err(RuntimeError::CommandFailed {
                command: format!("docker run -d --name {}", spec.name),
                status: "exit status: 125".into(),
                stderr: "port is already allocated".into(),
            });
        }
        self.running.lock().push(spec.name.clone());
        Ok(ContainerHandle {
            id: format!("{}-id", spec.name),
            name: spec.name.clone(),
        })
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        self.calls.lock().push(format!("inspect {name}"));
        Ok(self.running(name))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IssuerScript {
    Succeed,
    Reject,
    /// Cancels the run, then never returns
    CancelAndHang,
}

struct FakeIssuer {
    letsencrypt_dir: PathBuf,
    runtime: Arc<FakeRuntime>,
    script: IssuerScript,
    cancel: CancellationToken,
    calls: AtomicUsize,
    aborts: AtomicUsize,
    saw_responder: AtomicBool,
    requests: Mutex<Vec<IssueRequest>>,
}

impl FakeIssuer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateIssuer for FakeIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<(), IssuerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        self.saw_responder
            .store(self.runtime.running(RESPONDER), Ordering::SeqCst);

        match self.script {
            IssuerScript::Succeed => {
                write_bundle(&self.letsencrypt_dir, &request.domain);
                Ok(())
            }
            IssuerScript::Reject => Err(IssuerError::Rejected {
                status: "exit status: 1".into(),
                output: "Some challenges have failed.".into(),
            }),
            IssuerScript::CancelAndHang => {
                self.cancel.cancel();
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn abort(&self) -> Result<StepOutcome, IssuerError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutcome::Done)
    }
}

fn write_bundle(letsencrypt_dir: &Path, domain: &Domain) {
    let live = letsencrypt_dir.join("live").join(domain.as_str());
    fs::create_dir_all(&live).unwrap();
    fs::write(live.join("fullchain.pem"), "fullchain").unwrap();
    fs::write(live.join("privkey.pem"), "privkey").unwrap();
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: TempDir,
    config: Config,
    runtime: Arc<FakeRuntime>,
    issuer: Arc<FakeIssuer>,
    cancel: CancellationToken,
    /// Stands in for nginx inside the responder container
    server: Option<JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Answer every request the way the responder does once it is up
fn serve_responder_body() -> (std::net::SocketAddr, JoinHandle<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let listener = tokio::net::TcpListener::from_std(listener).unwrap();

    let app = axum::Router::new().fallback(|| async { RESPONDER_BODY });
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, server)
}

impl Harness {
    fn new(runtime: FakeRuntime, script: IssuerScript) -> Self {
        let dir = TempDir::new().unwrap();
        let (bind, server) = serve_responder_body();

        let mut config = Config::default();
        config.paths.letsencrypt_dir = dir.path().join("certbot/conf");
        config.paths.webroot = dir.path().join("certbot/www");
        config.paths.proxy_config = dir.path().join("nginx/nginx.conf");
        config.paths.service_topology = dir.path().join("docker-compose.yml");
        config.paths.state_dir = dir.path().join(".tlsinit");
        config.port_guard.grace_period_secs = 0;
        config.port_guard.verify_port_free = false;
        config.responder.bind = bind.to_string();
        config.responder.readiness_timeout_secs = 2;

        let runtime = Arc::new(runtime);
        let cancel = CancellationToken::new();
        let issuer = Arc::new(FakeIssuer {
            letsencrypt_dir: config.paths.letsencrypt_dir.clone(),
            runtime: Arc::clone(&runtime),
            script,
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
            saw_responder: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        });

        Self {
            dir,
            config,
            runtime,
            issuer,
            cancel,
            server: Some(server),
        }
    }

    /// Nothing answers on the responder address
    fn without_listener(mut self) -> Self {
        if let Some(server) = self.server.take() {
            server.abort();
        }
        self
    }

    fn bootstrap(&self) -> Bootstrap {
        Bootstrap::from_config(
            &self.config,
            self.runtime.clone(),
            self.issuer.clone(),
        )
        .unwrap()
        .with_cancellation(self.cancel.clone())
    }

    fn proxy_config(&self) -> Option<String> {
        fs::read_to_string(&self.config.paths.proxy_config).ok()
    }

    fn service_topology(&self) -> Option<String> {
        fs::read_to_string(&self.config.paths.service_topology).ok()
    }

    fn responder_stopped(&self) -> bool {
        !self.runtime.running(RESPONDER)
    }
}

fn domain() -> Domain {
    Domain::parse("chemi.vn").unwrap()
}

fn email() -> ContactEmail {
    ContactEmail::parse("admin@chemi.vn").unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_end_to_end_fresh_domain() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    let bootstrap = h.bootstrap();

    let outcome = bootstrap.run(&domain(), &email()).await.unwrap();

    assert!(matches!(outcome, BootstrapOutcome::Issued { .. }));
    assert_eq!(bootstrap.stage(), Stage::Done);
    assert!(h.responder_stopped());
    assert!(h.issuer.saw_responder.load(Ordering::SeqCst));

    let request = h.issuer.requests.lock()[0].clone();
    assert_eq!(request.domain, domain());
    assert_eq!(request.email, email());
    assert_eq!(request.webroot, h.config.paths.webroot);
    assert!(!request.force_renew);

    let proxy = h.proxy_config().unwrap();
    assert!(proxy.contains("server_name chemi.vn;"));
    assert!(proxy.contains("return 301 https://$host$request_uri;"));

    let topology: serde_yaml::Value = serde_yaml::from_str(&h.service_topology().unwrap()).unwrap();
    for service in ["app", "proxy", "certbot"] {
        assert!(topology["services"][service].is_mapping(), "missing {service}");
    }

    assert!(h.config.paths.webroot.is_dir());
    assert!(h.config.paths.state_dir.join("challenge.conf").is_file());
}

#[tokio::test]
async fn test_runtime_call_order() {
    let h = Harness::new(
        FakeRuntime::with_running(&["chemi-proxy"]),
        IssuerScript::Succeed,
    );

    h.bootstrap().run(&domain(), &email()).await.unwrap();

    assert_eq!(
        h.runtime.calls(),
        vec![
            "stop chemi-proxy".to_string(),
            "stop nginx".to_string(),
            format!("stop {RESPONDER}"),
            format!("run {RESPONDER}"),
            format!("stop {RESPONDER}"),
        ]
    );
    assert!(!h.runtime.running("chemi-proxy"));
}

#[tokio::test]
async fn test_second_run_produces_identical_artifacts() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);

    h.bootstrap().run(&domain(), &email()).await.unwrap();
    let first = (h.proxy_config().unwrap(), h.service_topology().unwrap());

    let outcome = h
        .bootstrap()
        .with_confirm(Arc::new(AssumeYes))
        .run(&domain(), &email())
        .await
        .unwrap();
    let second = (h.proxy_config().unwrap(), h.service_topology().unwrap());

    assert!(matches!(outcome, BootstrapOutcome::Issued { .. }));
    assert_eq!(first, second);
    assert_eq!(h.issuer.calls(), 2);
    // The second run replaced an existing certificate
    assert!(h.issuer.requests.lock()[1].force_renew);
}

#[tokio::test]
async fn test_existing_certificate_is_skipped_without_confirmation() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    write_bundle(&h.config.paths.letsencrypt_dir, &domain());
    let bootstrap = h.bootstrap();

    let outcome = bootstrap.run(&domain(), &email()).await.unwrap();

    match outcome {
        BootstrapOutcome::Skipped { domain: d, state } => {
            assert_eq!(d, domain());
            assert!(matches!(state, CertificateState::PresentOk { .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.issuer.calls(), 0);
    assert!(h.proxy_config().is_none());
    assert!(h.service_topology().is_none());
    assert!(!h.config.paths.webroot.exists());
    assert_eq!(bootstrap.stage(), Stage::Done);
}

#[tokio::test]
async fn test_port_guard_failure_stops_before_responder() {
    let h = Harness::new(
        FakeRuntime {
            stubborn: vec!["nginx".to_string()],
            ..Default::default()
        },
        IssuerScript::Succeed,
    );
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Precondition(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(bootstrap.stage(), Stage::Failed);
    assert_eq!(bootstrap.failed_at(), Some(Stage::ClearingPort));
    assert!(h.responder_stopped());
    assert!(!h.runtime.calls().contains(&format!("run {RESPONDER}")));
    assert_eq!(h.issuer.calls(), 0);
    assert!(h.proxy_config().is_none());
}

#[tokio::test]
async fn test_responder_launch_failure_is_cleaned_up() {
    let h = Harness::new(
        FakeRuntime {
            fail_run: true,
            ..Default::default()
        },
        IssuerScript::Succeed,
    );
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::ResponderStartup(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(bootstrap.failed_at(), Some(Stage::ResponderUp));
    assert!(h.responder_stopped());
    assert_eq!(h.runtime.calls().last(), Some(&format!("stop {RESPONDER}")));
    assert_eq!(h.issuer.calls(), 0);
}

#[tokio::test]
async fn test_responder_never_ready_is_cleaned_up() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed).without_listener();
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::ResponderStartup(_)));
    assert!(h.responder_stopped());
    assert_eq!(h.issuer.calls(), 0);
}

#[tokio::test]
async fn test_issuer_failure_leaves_configuration_untouched() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Reject);
    fs::create_dir_all(h.config.paths.proxy_config.parent().unwrap()).unwrap();
    fs::write(&h.config.paths.proxy_config, "previous config\n").unwrap();
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Issuance(_)));
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("Some challenges have failed."));
    assert_eq!(bootstrap.failed_at(), Some(Stage::Issuing));
    assert!(h.responder_stopped());
    assert_eq!(h.proxy_config().as_deref(), Some("previous config\n"));
    assert!(h.service_topology().is_none());
}

#[tokio::test]
async fn test_cancellation_during_issuance_stops_responder() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::CancelAndHang);
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(bootstrap.failed_at(), Some(Stage::Issuing));
    assert!(h.responder_stopped());
    assert_eq!(h.runtime.calls().last(), Some(&format!("stop {RESPONDER}")));
    assert_eq!(h.issuer.aborts(), 1);
    assert!(h.proxy_config().is_none());
}

#[tokio::test]
async fn test_cancellation_while_waiting_for_responder_stops_it() {
    let mut h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed).without_listener();
    h.config.responder.readiness_timeout_secs = 30;
    let bootstrap = h.bootstrap();

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });
    let err = tokio::time::timeout(Duration::from_secs(10), bootstrap.run(&domain(), &email()))
        .await
        .expect("cancellation must interrupt the readiness wait")
        .unwrap_err();

    assert!(matches!(err, AcmeError::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(bootstrap.failed_at(), Some(Stage::ResponderUp));
    assert_eq!(bootstrap.responder().state(), ResponderState::Stopped);
    assert!(h.responder_stopped());
    assert_eq!(h.runtime.calls().last(), Some(&format!("stop {RESPONDER}")));
    assert_eq!(h.issuer.calls(), 0);
    assert_eq!(h.issuer.aborts(), 0);
}

#[tokio::test]
async fn test_directory_creation_failure_is_precondition() {
    let mut h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    // A regular file where the webroot's parent should be
    let blocker = h.dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    h.config.paths.webroot = blocker.join("www");
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Precondition(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(bootstrap.failed_at(), Some(Stage::ClearingPort));
    assert!(h.responder_stopped());
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.issuer.calls(), 0);
    assert!(h.proxy_config().is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    h.cancel.cancel();

    let err = h.bootstrap().run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Cancelled));
    assert!(h.runtime.calls().is_empty());
    assert_eq!(h.issuer.calls(), 0);
}

#[tokio::test]
async fn test_artifact_write_failure_keeps_previous_files() {
    let mut h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    fs::create_dir_all(h.config.paths.proxy_config.parent().unwrap()).unwrap();
    fs::write(&h.config.paths.proxy_config, "previous config\n").unwrap();
    // A regular file where the topology's directory should be
    let blocker = h.dir.path().join("blocker");
    fs::write(&blocker, "").unwrap();
    h.config.paths.service_topology = blocker.join("docker-compose.yml");
    let bootstrap = h.bootstrap();

    let err = bootstrap.run(&domain(), &email()).await.unwrap_err();

    assert!(matches!(err, AcmeError::Artifact { .. }));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(bootstrap.failed_at(), Some(Stage::Templating));
    assert!(h.responder_stopped());
    assert_eq!(h.proxy_config().as_deref(), Some("previous config\n"));
}

#[tokio::test]
async fn test_embedded_responder_mode_needs_no_responder_container() {
    let mut h = Harness::new(FakeRuntime::default(), IssuerScript::Succeed);
    h.config.responder.mode = tlsinit_config::ResponderMode::Embedded;
    h.config.responder.bind = "127.0.0.1:0".to_string();

    let outcome = h.bootstrap().run(&domain(), &email()).await.unwrap();

    assert!(matches!(outcome, BootstrapOutcome::Issued { .. }));
    assert!(!h
        .runtime
        .calls()
        .iter()
        .any(|c| c.starts_with("run ")));
    assert!(h.proxy_config().unwrap().contains("server_name chemi.vn;"));
}
