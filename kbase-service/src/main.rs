use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kbase_service::clients::{
    ConfigMembership, FsBlobStore, create_chat_model, create_embedding_provider,
    create_ocr_provider, create_vector_index,
};
use kbase_service::{Collaborators, Database, KnowledgeBaseService, RuntimeConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting knowledge base service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let runtime_config = Arc::new(RuntimeConfig::load()?);
    let storage = runtime_config.static_config.storage.clone();

    std::fs::create_dir_all(&storage.data_dir)?;
    let db_path = storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    if let Some(listen) = &runtime_config.static_config.metrics.listen {
        let addr: SocketAddr = listen.parse()?;
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!(%addr, "Prometheus exporter listening");
    }

    let (embeddings_config, index_config, ocr_config, chat_config) = {
        let config = runtime_config.dynamic();
        (
            config.embeddings.clone(),
            config.vector_index.clone(),
            config.ocr.clone(),
            config.chat.clone(),
        )
    };

    let embeddings = create_embedding_provider(&embeddings_config)?;
    let vector_index = create_vector_index(&index_config)?;
    if let Err(e) = vector_index.ensure_collection(embeddings.dimensions()).await {
        // Qdrant may come up after us; upserts will fail until it does
        warn!(error = %e, "Could not prepare vector collection");
    }

    let service = Arc::new(KnowledgeBaseService::new(
        runtime_config.clone(),
        db,
        Collaborators {
            blobs: Arc::new(FsBlobStore::new(storage.blob_root())),
            embeddings,
            vector_index,
            ocr: create_ocr_provider(&ocr_config)?,
            membership: Arc::new(ConfigMembership::new(runtime_config.clone())),
            chat: create_chat_model(&chat_config)?,
        },
    ));

    let shutdown = CancellationToken::new();
    let workers = service
        .clone()
        .start_document_processing_workers(shutdown.clone())?;

    spawn_reload_on_hangup(runtime_config.clone());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    if let Err(e) = workers.await {
        error!(error = %e, "Worker task ended abnormally");
    }

    Ok(())
}

/// Re-read the dynamic configuration on SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(runtime_config: Arc<RuntimeConfig>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable; config reload disabled");
            return;
        }
    };

    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match runtime_config.reload() {
                Ok(()) => info!("Dynamic configuration reloaded"),
                Err(e) => error!(error = %e, "Configuration reload failed; keeping previous values"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_runtime_config: Arc<RuntimeConfig>) {}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kbase_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
