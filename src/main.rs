//! servicecreator - exposes annotated Deployments through managed Services

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use servicecreator::annotation::EXPOSE_ANNOTATION;
use servicecreator::config::{ControllerConfig, DEFAULT_SYNC_TIMEOUT};
use servicecreator::controller::Controller;
use servicecreator::kube_utils::create_client;
use servicecreator::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

/// Kubernetes controller that creates a Service for every Deployment carrying
/// the exposure annotation
#[derive(Parser, Debug)]
#[command(name = "servicecreator", version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file. Defaults to in-cluster config, then the
    /// standard kubeconfig locations.
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Only watch Deployments in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Annotation that marks a Deployment for exposure; its value is the port
    #[arg(long, default_value = EXPOSE_ANNOTATION)]
    annotation: String,

    /// Extra namespace to ignore, on top of the system namespaces (repeatable)
    #[arg(long = "exclude-namespace")]
    exclude_namespaces: Vec<String>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Seconds to wait for the initial Deployment list before giving up
    #[arg(long, default_value_t = DEFAULT_SYNC_TIMEOUT.as_secs())]
    sync_timeout_secs: u64,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            annotation_key: self.annotation.clone(),
            watch_namespace: self.namespace.clone(),
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            ..Default::default()
        }
        .exclude_namespaces(self.exclude_namespaces.iter().cloned())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client needs a process-wide TLS crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        log_json: cli.log_json,
        ..Default::default()
    })?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %e, "Controller exited with error");
    }
    shutdown_telemetry();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let controller = Controller::new(client, cli.controller_config());

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    controller.run(shutdown).await?;
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C will stop the controller");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;

    shutdown.cancel();
}

/// Resolve on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
