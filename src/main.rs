use anyhow::{Context, Result};
use axum::Router;
use object_thumbnailer::{
    config::{AppConfig, Backend},
    oneshot, routes,
    services::{
        dispatcher::{DispatcherConfig, EventDispatcher},
        document_rasterizer::{
            DocumentRasterizer, PageRasterizer, PdfiumRasterizer, UnavailableRasterizer,
        },
        image_thumbnailer::ImageThumbnailer,
        pipeline::ThumbnailPipeline,
        raster::SizingPolicy,
        storage::{LocalObjectStore, ObjectStore, S3ObjectStore},
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + one-shot event file ---
    let (cfg, event_file) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-thumbnailer with config: {:?}", cfg);

    fs::create_dir_all(&cfg.scratch_dir)
        .await
        .with_context(|| format!("creating scratch directory {}", cfg.scratch_dir.display()))?;

    let store = connect_store(&cfg).await?;
    let dispatcher = EventDispatcher::new(
        DispatcherConfig {
            source_bucket: cfg.source_bucket.clone(),
            destination_bucket: cfg.destination_bucket.clone(),
            concurrency: cfg.concurrency,
        },
        store.clone(),
        store,
        Arc::new(build_pipeline(&cfg)),
    );

    // --- Handle one-shot mode ---
    if let Some(path) = event_file {
        oneshot::run_event_file(&dispatcher, &path, &mut std::io::stdout()).await?;
        return Ok(());
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState {
        dispatcher,
        scratch_dir: cfg.scratch_dir.clone(),
    });

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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Both buckets live behind the same backend.
async fn connect_store(cfg: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        Backend::Local => {
            tracing::debug!("Opening local store at {} ({})", cfg.storage_dir, cfg.database_url);
            Arc::new(
                LocalObjectStore::open(&cfg.database_url, &cfg.storage_dir)
                    .await
                    .with_context(|| format!("opening local store {}", cfg.database_url))?,
            )
        }
        Backend::S3 => Arc::new(S3ObjectStore::connect(&cfg.region, cfg.endpoint.as_deref()).await),
    };
    Ok(store)
}

/// Without PDFium, images still work and documents fail per record.
fn build_pipeline(cfg: &AppConfig) -> ThumbnailPipeline {
    let policy = SizingPolicy::new(cfg.max_dimension, cfg.quality);

    let rasterizer: Arc<dyn PageRasterizer> = match PdfiumRasterizer::bind(cfg.pdfium_path.as_deref()) {
        Ok(pdfium) => {
            tracing::info!("PDFium bound; document thumbnails enabled");
            Arc::new(pdfium)
        }
        Err(err) => {
            tracing::warn!("PDFium unavailable ({}); document thumbnails will fail", err);
            Arc::new(UnavailableRasterizer::new(err.to_string()))
        }
    };

    ThumbnailPipeline::new(
        ImageThumbnailer::new(policy),
        DocumentRasterizer::new(policy, cfg.density, &cfg.scratch_dir, rasterizer),
    )
}
