//! # k8s-pvc-tagger
//!
//! Kubernetes controller that copies tags from PersistentVolumeClaims onto the
//! cloud volumes backing them.
//!
//! ## Overview
//!
//! 1. Parses flags and environment into an immutable tagging configuration
//! 2. Serves `/healthz` + `/readyz` and `/metrics` on separate ports
//! 3. Connects to the selected cloud (AWS, GCP or Azure)
//! 4. Waits to become leader through a `coordination.k8s.io` Lease
//! 5. While leading, watches PVCs in every configured namespace and reconciles
//!    each Added / Updated event against the backing volume's tags
//!
//! Shuts down on SIGTERM or Ctrl+C, letting in-flight reconciliations finish
//! and releasing the lease. Losing the lease stops the watchers and exits.

use anyhow::{Context, Result};
use clap::Parser;
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_pvc_tagger::config::{Args, ConfigError, LogSettings, RuntimeSettings};
use k8s_pvc_tagger::observability::metrics;
use k8s_pvc_tagger::provider::TaggingBackend;
use k8s_pvc_tagger::runtime::{run_watch_loop, LeaderElector, LeadershipEnd};
use k8s_pvc_tagger::server::{metrics_router, start_server, status_router, ServerState};
use k8s_pvc_tagger::{logging, Reconciler};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // rustls needs a process-wide crypto provider before any TLS client is built
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    let log_settings = LogSettings::from_env()?;
    logging::init_logging(&log_settings)?;

    info!(
        version = env!("BUILD_VERSION"),
        build_time = env!("BUILD_TIME"),
        "Starting k8s-pvc-tagger"
    );

    let (config, runtime) = args.resolve()?;
    info!(
        cloud = %config.cloud,
        annotation_prefix = %config.annotation_prefix,
        default_tags = ?config.default_tags,
        "Loaded configuration"
    );

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    spawn_server("status", runtime.status_port, status_router(Arc::clone(&server_state)));
    spawn_server("metrics", runtime.metrics_port, metrics_router());

    let client = kube_client(&runtime).await?;
    let backend = TaggingBackend::connect(config.cloud, &runtime)
        .await
        .with_context(|| format!("Failed to set up {} clients", config.cloud))?;

    let volumes: Api<PersistentVolume> = Api::all(client.clone());
    let reconciler = Reconciler::new(Arc::new(config), Arc::new(volumes), backend);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Failed to listen for shutdown signals: {:#}", e);
        }
        info!("Shutdown requested");
        let _ = stop_tx.send(true);
    });
    server_state.mark_ready();

    let leases: Api<Lease> = Api::namespaced(client.clone(), &runtime.lease.namespace);
    let elector = LeaderElector::new(leases, runtime.lease.clone());
    if !elector.acquire(&mut stop_rx).await {
        info!("k8s-pvc-tagger stopped before becoming leader");
        return Ok(());
    }

    let (watchers_tx, watchers_rx) = watch::channel(false);
    let watchers = spawn_watchers(&client, &runtime, &reconciler, &watchers_rx);

    let end = elector.hold(&mut stop_rx).await;
    info!("Stopping watchers");
    let _ = watchers_tx.send(true);
    for handle in watchers {
        if let Err(e) = handle.await {
            error!("PVC watcher task failed: {}", e);
        }
    }

    match end {
        LeadershipEnd::Shutdown => {
            if let Err(e) = elector.release().await {
                warn!("Failed to release leader lease: {:#}", e);
            }
        }
        LeadershipEnd::Lost => info!(identity = %runtime.lease.identity, "Leader lost"),
    }

    info!("k8s-pvc-tagger stopped");
    Ok(())
}

fn spawn_server(name: &'static str, port: u16, router: axum::Router) {
    tokio::spawn(async move {
        if let Err(e) = start_server(port, router).await {
            error!(server = name, "HTTP server error: {}", e);
        }
    });
}

async fn kube_client(runtime: &RuntimeSettings) -> Result<Client> {
    if runtime.kubeconfig.is_none() && runtime.context.is_none() {
        // In-cluster, or ~/.kube/config
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    }

    let options = KubeConfigOptions {
        context: runtime.context.clone(),
        ..KubeConfigOptions::default()
    };
    let kube_config = match &runtime.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ConfigError::Kubeconfig(format!("{}: {e}", path.display()))
            })?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await
        }
        None => kube::Config::from_kubeconfig(&options).await,
    }
    .map_err(|e| ConfigError::Kubeconfig(e.to_string()))?;

    Client::try_from(kube_config).context("Failed to create Kubernetes client from kubeconfig")
}

fn spawn_watchers(
    client: &Client,
    runtime: &RuntimeSettings,
    reconciler: &Reconciler,
    shutdown: &watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    runtime
        .watch_namespaces
        .iter()
        .map(|namespace| {
            let api: Api<PersistentVolumeClaim> = if namespace.is_empty() {
                Api::all(client.clone())
            } else {
                Api::namespaced(client.clone(), namespace)
            };
            tokio::spawn(run_watch_loop(
                api,
                namespace.clone(),
                reconciler.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }
    Ok(())
}
