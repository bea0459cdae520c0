//! `pipewright` server binary: hosts the sample services over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipewright_server::events::{ChangeRelay, EventDispatcher};
use pipewright_server::network::{NetworkConfig, NetworkModule};
use pipewright_server::sample::{audit_service, contacts_service};
use pipewright_server::service::{
    BackgroundWorker, JwtIdentityService, PipelineConfig, ServiceRegistry, TokenPrivilegeGate,
};
use pipewright_server::storage::{IdempotencyJanitor, MemoryDocumentStore, SharedStore};
use pipewright_server::telemetry::{init_tracing, install_metrics_exporter, LogFormat};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "pipewright", version, about = "Declarative HTTP services and guarded event handlers")]
struct ServerArgs {
    #[arg(long, env = "PIPEWRIGHT_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// `pretty` or `json`.
    #[arg(long, env = "PIPEWRIGHT_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// redb file; in-memory storage when unset.
    #[arg(long, env = "PIPEWRIGHT_STORE_PATH")]
    store_path: Option<PathBuf>,

    /// How long idempotency records are kept.
    #[arg(long, env = "PIPEWRIGHT_RETENTION_HOURS", default_value_t = 72)]
    retention_hours: u64,

    #[arg(
        long,
        env = "PIPEWRIGHT_JANITOR_INTERVAL_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    janitor_interval_secs: u64,

    /// Prometheus listener; metrics are not exported when unset.
    #[arg(long, env = "PIPEWRIGHT_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// HS256 secret for access tokens; every route is open when unset.
    #[arg(long, env = "PIPEWRIGHT_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Events older than this are dropped unless a service says otherwise.
    #[arg(long, env = "PIPEWRIGHT_MAX_AGE_MS")]
    max_age_ms: Option<u64>,

    #[arg(long, env = "PIPEWRIGHT_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,
}

fn open_store(path: Option<&PathBuf>) -> anyhow::Result<SharedStore> {
    match path {
        #[cfg(feature = "redb")]
        Some(path) => {
            let store = pipewright_server::storage::RedbDocumentStore::open(path)?;
            info!(path = %path.display(), "using redb store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redb"))]
        Some(path) => anyhow::bail!(
            "store path {} given but the redb feature is disabled",
            path.display()
        ),
        None => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
    }
}

/// Retention horizon for idempotency records, saturating on huge values.
fn retention(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn pipeline_config(args: &ServerArgs) -> Arc<PipelineConfig> {
    let mut builder = PipelineConfig::builder();
    if let Some(secret) = &args.jwt_secret {
        let identity = Arc::new(JwtIdentityService::new(secret.as_bytes()));
        builder = builder.privilege_gate(TokenPrivilegeGate::new(identity));
    }
    if let Some(max_age_ms) = args.max_age_ms {
        builder = builder.max_age_ms(max_age_ms);
    }
    builder.build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.log_format)?;
    if let Some(addr) = args.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let store = open_store(args.store_path.as_ref())?;
    let config = pipeline_config(&args);

    let audit = audit_service(SharedStore::clone(&store));
    let dispatcher = Arc::new(EventDispatcher::new([&audit], &store, &config));
    let relay = Arc::new(ChangeRelay::new(Arc::clone(&dispatcher)));

    let registry = Arc::new(ServiceRegistry::new(Arc::clone(&config)));
    registry.register(contacts_service(SharedStore::clone(&store), relay));
    registry.register(audit);
    info!(functions = ?dispatcher.function_names(), "event functions ready");

    let mut janitor = BackgroundWorker::start(
        IdempotencyJanitor::new(
            SharedStore::clone(&store),
            retention(args.retention_hours),
        ),
        Duration::from_secs(args.janitor_interval_secs),
    );

    let network = NetworkConfig {
        host: args.host.clone(),
        port: args.port,
        cors_origins: args.cors_origins.clone(),
        ..NetworkConfig::default()
    };
    let mut module = NetworkModule::new(network, registry, dispatcher);
    module.start().await?;
    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    janitor.stop().await;
    info!("pipewright stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn janitor_interval_must_be_positive() {
        assert!(ServerArgs::try_parse_from(["pipewright", "--janitor-interval-secs", "0"]).is_err());
        let args =
            ServerArgs::try_parse_from(["pipewright", "--janitor-interval-secs", "5"]).unwrap();
        assert_eq!(args.janitor_interval_secs, 5);
    }

    #[test]
    fn retention_saturates_instead_of_overflowing() {
        assert_eq!(retention(2), Duration::from_secs(7200));
        assert_eq!(retention(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
