use anyhow::{Context, Result};
use axum::Router;
use image_pipeline::{
    config::AppConfig,
    routes,
    services::{
        AppState,
        blob_store::{BlobStore, validate_bucket_name},
        metadata_table::MetadataTable,
        processor::Processor,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-pipeline with config: {:?}", cfg);

    validate_bucket_name(&cfg.upload_bucket).context("UPLOAD_BUCKET")?;

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .context("connecting to SQLite")?,
    );

    // --- Long-lived service handles ---
    // Only the upload path publishes; the worker's handle must not keep the
    // channel open or shutdown would never finish.
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let blob_reader = BlobStore::new(db.clone(), cfg.storage_dir.clone());
    let blobs = blob_reader.clone().with_notifier(events_tx);
    let table = MetadataTable::new(db.clone(), cfg.metadata_table.clone())
        .context("DDB_TABLE")?;

    // --- Schema ---
    blobs.ensure_schema().await.context("creating blob schema")?;
    table
        .ensure_schema()
        .await
        .with_context(|| format!("creating table {}", table.name()))?;
    if migrate {
        tracing::info!("Schema is up to date.");
        return Ok(());
    }

    // --- Processing worker ---
    let worker = Processor::new(blob_reader, table.clone()).listen(events_rx);

    // --- Build router ---
    let state = AppState::new(blobs, table, cfg.upload_bucket.clone(), cfg.max_upload_bytes);
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last sender; wait until queued and in-flight processing is done.
    worker.await?;
    tracing::info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
