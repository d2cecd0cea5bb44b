//! tlsinit - Main entry point
//!
//! Obtains a TLS certificate for one domain and generates the reverse-proxy
//! configuration that serves it.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tlsinit_bootstrap::acme::AcmeError;
use tlsinit_bootstrap::{
    signals, templates, ArtifactPaths, ArtifactSet, AssumeYes, Bootstrap, BootstrapOutcome,
    CertbotIssuer, CertificateInspector, CertificateState, Confirm, ContainerRuntime, DockerCli,
    StdinConfirm, TemplateSettings,
};
use tlsinit_common::{ContactEmail, Domain, ValueError};
use tlsinit_config::{Config, ConfigError, ResponderMode, CONFIG_ENV_VAR};

/// Exit code for configuration and argument errors
const EXIT_CONFIG: u8 = 6;

/// tlsinit - Let's Encrypt bootstrap for a docker compose deployment
#[derive(Parser, Debug)]
#[command(name = "tlsinit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Domain to obtain a certificate for (default from configuration)
    domain: Option<String>,

    /// Contact email registered with the ACME account (default from configuration)
    email: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", env = CONFIG_ENV_VAR, global = true)]
    config: Option<PathBuf>,

    /// Replace an existing certificate without asking
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    /// Serve challenges from this process instead of an nginx container
    #[arg(long = "embedded-responder")]
    embedded_responder: bool,

    /// Use the ACME staging environment
    #[arg(long = "staging")]
    staging: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the state of the certificate for a domain
    Status {
        /// Domain to inspect (default from configuration)
        domain: Option<String>,
    },
    /// Render the proxy configuration and service topology
    Render {
        /// Domain to render for (default from configuration)
        domain: Option<String>,

        /// Write the files into this directory instead of printing them
        #[arg(long = "out")]
        out: Option<PathBuf>,
    },
    /// Validate configuration file and exit
    Test,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let result = match &cli.command {
        Some(Commands::Test) => test_config(cli.config.as_deref()),
        Some(Commands::Status { domain }) => show_status(cli.config.as_deref(), domain.as_deref()),
        Some(Commands::Render { domain, out }) => {
            render_artifacts(cli.config.as_deref(), domain.as_deref(), out.as_deref())
        }
        None => run_bootstrap(&cli),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("tlsinit: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Logs go to stderr so `render` output stays clean
fn init_tracing(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<AcmeError>() {
        return u8::try_from(e.exit_code()).unwrap_or(1);
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<ValueError>().is_some()
    {
        return EXIT_CONFIG;
    }
    1
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => debug!("No configuration specified, using embedded default configuration"),
    }
    Config::load(path).context("Failed to load configuration")
}

/// Print validation problems; `false` if there were errors
fn report_validation(config: &Config) -> bool {
    let result = config.validate();
    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        error!("{}", error);
    }
    result.is_valid()
}

fn resolve_domain(arg: Option<&str>, config: &Config) -> Result<Domain> {
    let raw = arg.unwrap_or(&config.defaults.domain);
    Domain::parse(raw).with_context(|| format!("Invalid domain '{}'", raw))
}

/// Validate configuration and exit
fn test_config(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config_path)?;

    if !report_validation(&config) {
        eprintln!("tlsinit: configuration test failed");
        return Ok(ExitCode::from(EXIT_CONFIG));
    }

    info!("Configuration test successful:");
    info!("  - domain {} <{}>", config.defaults.domain, config.defaults.email);
    info!("  - challenge port {}", config.port_guard.port);
    info!("  - responder mode {:?}", config.responder.mode);
    info!(
        "  - artifacts {} and {}",
        config.paths.proxy_config.display(),
        config.paths.service_topology.display()
    );

    println!(
        "tlsinit: configuration {} test is successful",
        config_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(embedded)".to_string())
    );
    Ok(ExitCode::SUCCESS)
}

/// Print the certificate state for a domain
fn show_status(config_path: Option<&Path>, domain: Option<&str>) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let domain = resolve_domain(domain, &config)?;
    let inspector = CertificateInspector::new(
        config.paths.letsencrypt_dir.clone(),
        config.issuer.renew_before_days,
    );

    let state = inspector.inspect(&domain)?;
    let now = chrono::Utc::now();
    let line = match &state {
        CertificateState::Absent => "no certificate".to_string(),
        CertificateState::PresentOk { expires: None } => {
            "certificate present (expiry unreadable)".to_string()
        }
        CertificateState::PresentOk {
            expires: Some(expires),
        } => format!(
            "valid until {} ({} days left)",
            expires.format("%Y-%m-%d %H:%M UTC"),
            (*expires - now).num_days()
        ),
        CertificateState::PresentOutdated { expires } if *expires <= now => {
            format!("expired on {}", expires.format("%Y-%m-%d %H:%M UTC"))
        }
        CertificateState::PresentOutdated { expires } => format!(
            "expires {} (renewal due)",
            expires.format("%Y-%m-%d %H:%M UTC")
        ),
    };

    println!("{}: {}", domain, line);
    Ok(ExitCode::SUCCESS)
}

/// Render artifacts without touching the container runtime
fn render_artifacts(
    config_path: Option<&Path>,
    domain: Option<&str>,
    out: Option<&Path>,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let domain = resolve_domain(domain, &config)?;
    let rendered = templates::render(&domain, &TemplateSettings::from_config(&config))?;

    let Some(out) = out else {
        println!("# ---- {} ----", config.paths.proxy_config.display());
        print!("{}", rendered.proxy_config);
        println!("# ---- {} ----", config.paths.service_topology.display());
        print!("{}", rendered.service_topology);
        return Ok(ExitCode::SUCCESS);
    };

    let file_name = |path: &Path, fallback: &str| {
        out.join(path.file_name().unwrap_or_else(|| OsStr::new(fallback)))
    };
    let set = ArtifactSet::new(ArtifactPaths {
        proxy_config: file_name(&config.paths.proxy_config, "nginx.conf"),
        service_topology: file_name(&config.paths.service_topology, "docker-compose.yml"),
    });
    set.commit(&rendered)?;

    println!(
        "Wrote {} and {}",
        set.paths().proxy_config.display(),
        set.paths().service_topology.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Drive `fut` to completion, then shut the runtime down without waiting
/// for blocking tasks. A prompt interrupted by a signal is still parked in
/// `read_line` and must not keep the process alive.
fn block_on_detached<F: std::future::Future>(rt: tokio::runtime::Runtime, fut: F) -> F::Output {
    let output = rt.block_on(fut);
    rt.shutdown_background();
    output
}

/// Obtain a certificate and regenerate the configuration
fn run_bootstrap(cli: &Cli) -> Result<ExitCode> {
    let mut config = load_config(cli.config.as_deref())?;
    if cli.embedded_responder {
        config.responder.mode = ResponderMode::Embedded;
    }
    if cli.staging {
        config.issuer.staging = true;
    }

    if !report_validation(&config) {
        eprintln!("tlsinit: invalid configuration, run `tlsinit test` for details");
        return Ok(ExitCode::from(EXIT_CONFIG));
    }

    let domain = resolve_domain(cli.domain.as_deref(), &config)?;
    let raw_email = cli.email.as_deref().unwrap_or(&config.defaults.email);
    let email = ContactEmail::parse(raw_email)
        .with_context(|| format!("Invalid email '{}'", raw_email))?;

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerCli::new(config.runtime.docker_binary.clone()));
    let issuer = CertbotIssuer::new(
        config.runtime.docker_binary.clone(),
        config.issuer.image.clone(),
        config.paths.letsencrypt_dir.clone(),
    )
    .with_staging(config.issuer.staging)
    .with_key_type(config.issuer.key_type.clone())
    .with_container_name(format!("{}-issuer", config.responder.name));

    let confirm: Arc<dyn Confirm> = if cli.yes {
        Arc::new(AssumeYes)
    } else {
        Arc::new(StdinConfirm)
    };
    let cancel = CancellationToken::new();

    let bootstrap = Bootstrap::from_config(&config, runtime, Arc::new(issuer))?
        .with_confirm(confirm)
        .with_cancellation(cancel.clone());

    info!(domain = %domain, email = %email, staging = config.issuer.staging, "Starting bootstrap");

    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = block_on_detached(rt, async {
        let watcher = signals::cancel_on_signal(cancel.clone());
        let result = bootstrap.run(&domain, &email).await;
        watcher.abort();
        result
    });

    match result {
        Ok(BootstrapOutcome::Skipped { domain, state }) => {
            let expiry = state
                .expires()
                .map(|e| format!(" (expires {})", e.format("%Y-%m-%d")))
                .unwrap_or_default();
            println!(
                "Certificate for {}{} already present, nothing changed. Use --yes to request a new one.",
                domain, expiry
            );
            Ok(ExitCode::SUCCESS)
        }
        Ok(BootstrapOutcome::Issued { domain, artifacts }) => {
            println!("Certificate issued for {}.", domain);
            println!("  proxy configuration: {}", artifacts.proxy_config.display());
            println!("  service topology:    {}", artifacts.service_topology.display());
            println!(
                "Start the stack with: docker compose -f {} up -d",
                artifacts.service_topology.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let stage = bootstrap
                .failed_at()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "bootstrap".to_string());
            eprintln!("tlsinit: {} failed: {}", stage, e);
            Ok(ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1)))
        }
    }
}
