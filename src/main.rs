mod config;
mod copier;
mod filter;
mod handlers;
mod health;
mod metrics;
mod reference;
mod registry;
mod secrets;
mod skopeo;
mod swapper;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use clap::Parser;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use prometheus_client::registry::Registry as MetricsRegistry;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{LogFormat, MirrorConfig};
use crate::copier::Copier;
use crate::registry::EcrClient;
use crate::secrets::{ImagePullSecretsProvider, KubeSecretsProvider, NoopSecretsProvider};
use crate::skopeo::Skopeo;
use crate::swapper::{ImageSwapper, SwapperOptions};

#[derive(Parser)]
#[command(
    name = "k8s-mirror",
    about = "Kubernetes mutating webhook mirroring container images into a private registry"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "/etc/k8s-mirror/config.yaml", env = "MIRROR_CONFIG")]
    config: String,
}

fn fatal(message: String) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn parse_addr(value: &str, what: &str) -> SocketAddr {
    value
        .parse()
        .unwrap_or_else(|err| fatal(format!("invalid {what} '{value}': {err}")))
}

fn init_tracing(config: &MirrorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Resolves when the process is asked to stop. Dropping the server futures is
/// how shutdown happens: in-flight copies are detached tasks and survive
/// until the runtime itself winds down.
async fn wait_for_shutdown() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for interrupt: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("interrupt received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

/// TLS-terminating accept loop for the admission endpoint. Each connection is
/// handed to its own task; the loop itself never blocks on a handshake.
async fn serve_webhook(
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
    ops: Arc<health::Ops>,
) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => fatal(format!("failed to bind webhook listener on {addr}: {err}")),
    };
    info!(%addr, "admission webhook listening");
    ops.mark_ready();

    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                tokio::spawn(serve_tls_connection(conn, peer, acceptor.clone(), app.clone()));
            }
            Err(err) => error!("failed to accept connection: {err}"),
        }
    }
}

async fn serve_tls_connection(
    conn: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    app: Router,
) {
    // Port scanners and kubelet probes produce plenty of failed handshakes;
    // they are not worth an error-level line.
    let stream = match acceptor.accept(conn).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%peer, "TLS handshake failed: {err}");
            return;
        }
    };

    let service = TowerToHyperService::new(app.into_service());
    if let Err(err) = HttpBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, "connection closed with error: {err}");
    }
}

async fn serve_ops(addr: SocketAddr, app: Router) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => fatal(format!("failed to bind metrics listener on {addr}: {err}")),
    };
    info!(%addr, "metrics and health endpoints listening");

    if let Err(err) = axum::serve(listener, app).await {
        error!("metrics server error: {err}");
    }
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default CryptoProvider");

    let cli = Cli::parse();

    let config = MirrorConfig::load(&cli.config)
        .unwrap_or_else(|err| fatal(format!("failed to load config from {}: {err}", cli.config)));

    init_tracing(&config);

    let target_domain = config.target.ecr_domain();
    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        target = %target_domain,
        image_swap_policy = ?config.image_swap_policy,
        image_copy_policy = ?config.image_copy_policy,
        filters = config.source.filters.len(),
        dry_run = config.dry_run,
        "k8s-mirror starting"
    );

    let tls_config = tls::server_config(&config.tls_cert_path, &config.tls_key_path)
        .unwrap_or_else(|err| fatal(format!("failed to load TLS config: {err}")));
    let tls_acceptor = TlsAcceptor::from(tls_config);

    let mut metrics_registry = MetricsRegistry::default();
    let mirror_metrics = Arc::new(metrics::MirrorMetrics::new(&mut metrics_registry));
    let ops = health::Ops::new(metrics_registry);

    let ecr = EcrClient::new(
        &config.target.region,
        &target_domain,
        Arc::clone(&mirror_metrics),
    )
    .await
    .unwrap_or_else(|err| {
        fatal(format!(
            "failed to connect to target registry {target_domain}: {err}"
        ))
    });

    let secrets_provider: Arc<dyn ImagePullSecretsProvider> =
        match kube::Client::try_default().await {
            Ok(client) => Arc::new(KubeSecretsProvider::new(client)),
            Err(err) => {
                warn!(%err, "no cluster credentials, copying without image pull secrets");
                Arc::new(NoopSecretsProvider)
            }
        };

    let copier = Arc::new(Copier::new(
        config.copier.max_workers,
        config.copier.queue_size,
        config.copier.queue_full,
    ));

    let swapper = ImageSwapper::new(
        ecr,
        secrets_provider,
        copier,
        Skopeo::default(),
        Arc::clone(&mirror_metrics),
        SwapperOptions::from_config(&config),
    );

    let app_state = Arc::new(handlers::AppState {
        swapper,
        metrics: mirror_metrics,
    });

    let webhook_router = Router::new()
        .route("/mutate", post(handlers::handle_mutate))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(app_state);

    let listen_addr = parse_addr(&config.listen_addr, "listen_addr");
    let metrics_addr = parse_addr(&config.metrics_addr, "metrics_addr");

    tokio::select! {
        _ = serve_webhook(listen_addr, tls_acceptor, webhook_router, Arc::clone(&ops)) => {}
        _ = serve_ops(metrics_addr, health::router(ops)) => {}
        _ = wait_for_shutdown() => {}
    }

    info!("k8s-mirror stopped");
}
