//! mevzuat-server binary.
//!
//! Loads configuration, wires the adapters, runs the startup dimension
//! check, spawns the ingestion worker pool and the sweeper, and serves the
//! HTTP API. Exit codes: 0 ok, 1 configuration error, 2 adapter
//! unavailable, 3 invariant violation.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mevzuat::auth::jwt::AuthVerifier;
use mevzuat::db::{BlobStore, FsBlobStore, InMemoryVectorIndex, MetaStore, VectorIndex};
use mevzuat::extract::{RemoteTextExtractor, TextExtractor};
use mevzuat::ingest::{spawn_sweeper, IngestQueue, IngestWorker};
use mevzuat::llm::{create_generator, FallbackGenerator};
use mevzuat::rag::chunker::ChunkerConfig;
use mevzuat::rag::{
    AnswerComposer, Cache, CacheCoordinator, Embedder, HttpEmbedder, InMemoryCache,
    PassageChunker, QueryPlanner, QueryService,
};
use mevzuat::{app_router, AppError, AppState, CreditLedger, Settings};

#[derive(Parser, Debug)]
#[command(name = "mevzuat-server", about = "Turkish legal document RAG service")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "mevzuat.toml", env = "MEVZUAT_CONFIG")]
    config: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            let code = match e.downcast_ref::<AppError>() {
                Some(AppError::AdapterUnavailable { .. }) => 2,
                Some(AppError::InvariantViolation(_)) => 3,
                _ => 1,
            };
            ExitCode::from(code)
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<()> {
    tracing::info!("Starting mevzuat-server");

    // =================================================================
    // Configuration
    // =================================================================
    let settings = if std::path::Path::new(&args.config).exists() {
        let settings = Settings::load(&args.config)?;
        tracing::info!(path = %args.config, "Configuration loaded");
        settings
    } else {
        tracing::warn!(
            path = %args.config,
            "Configuration file not found, using built-in defaults"
        );
        let settings = Settings::default();
        settings.validate()?;
        settings
    };
    let settings = Arc::new(settings);

    // =================================================================
    // Metadata store
    // =================================================================
    if settings.database.url != ":memory:" {
        if let Some(parent) = std::path::Path::new(&settings.database.url).parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let meta = Arc::new(MetaStore::new_local(&settings.database.url).await?);
    tracing::info!(url = %settings.database.url, "Metadata store initialized");

    // =================================================================
    // Blob store
    // =================================================================
    let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(settings.blob.root.clone())?);
    tracing::info!(root = %settings.blob.root, "Blob store initialized");

    // =================================================================
    // Cache
    // =================================================================
    let cache_backend: Arc<dyn Cache> = match settings.cache.backend.as_str() {
        #[cfg(feature = "redis-cache")]
        "redis" => {
            let url = std::env::var(&settings.cache.redis_url_env).map_err(|_| {
                anyhow::anyhow!("{} must be set for the redis cache", settings.cache.redis_url_env)
            })?;
            let cache = mevzuat::rag::RedisCache::connect(&url).await?;
            tracing::info!("Redis cache initialized");
            Arc::new(cache)
        }
        #[cfg(not(feature = "redis-cache"))]
        "redis" => {
            anyhow::bail!("cache.backend = \"redis\" requires the `redis-cache` feature")
        }
        _ => {
            tracing::info!("In-memory cache initialized");
            Arc::new(InMemoryCache::new())
        }
    };
    let cache = Arc::new(CacheCoordinator::new(
        cache_backend,
        settings.embedding.model.clone(),
        Duration::from_secs(settings.cache.ttl_embedding_s),
        Duration::from_secs(settings.cache.ttl_query_s),
    ));

    // =================================================================
    // Embedder
    // =================================================================
    let embed_api_key = settings
        .embedding
        .api_key_env
        .as_ref()
        .and_then(|env| std::env::var(env).ok());
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        settings.embedding.base_url.clone(),
        settings.embedding.model.clone(),
        embed_api_key,
        settings.embedding.dim,
    ));
    tracing::info!(
        model = %settings.embedding.model,
        dim = settings.embedding.dim,
        "Embedder initialized"
    );

    // =================================================================
    // Vector index + startup dimension check
    // =================================================================
    let vector: Arc<dyn VectorIndex> = match settings.vector.backend.as_str() {
        #[cfg(feature = "qdrant")]
        "qdrant" => {
            let qdrant = settings
                .vector
                .qdrant
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("vector.qdrant section missing"))?;
            let api_key = qdrant
                .api_key_env
                .as_ref()
                .and_then(|env| std::env::var(env).ok());
            Arc::new(mevzuat::db::QdrantVectorIndex::new(
                &qdrant.url,
                api_key,
                settings.vector.collection.clone(),
            )?)
        }
        #[cfg(not(feature = "qdrant"))]
        "qdrant" => {
            anyhow::bail!("vector.backend = \"qdrant\" requires the `qdrant` feature")
        }
        _ => Arc::new(InMemoryVectorIndex::new()),
    };

    // The configured dimension, the embedder and the collection schema must
    // agree; refusing to start beats serving wrong-dimension searches.
    if embedder.dimensions() != settings.embedding.dim {
        return Err(AppError::InvariantViolation(format!(
            "embedder dimension {} does not match configured {}",
            embedder.dimensions(),
            settings.embedding.dim
        ))
        .into());
    }
    vector.ensure_collection(settings.embedding.dim).await?;
    tracing::info!(
        backend = vector.provider_name(),
        collection = %settings.vector.collection,
        dim = settings.embedding.dim,
        "Vector index ready"
    );

    // =================================================================
    // Generators
    // =================================================================
    let primary_settings = settings
        .generation
        .providers
        .get(&settings.generation.primary)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "generation.primary \"{}\" has no provider entry",
                settings.generation.primary
            )
        })?;
    let primary = create_generator(&settings.generation.primary, primary_settings)?;

    let fallback = match &settings.generation.fallback {
        Some(name) => {
            let provider_settings = settings.generation.providers.get(name).ok_or_else(|| {
                anyhow::anyhow!("generation.fallback \"{}\" has no provider entry", name)
            })?;
            Some(create_generator(name, provider_settings)?)
        }
        None => None,
    };
    let generator = Arc::new(FallbackGenerator::new(
        primary,
        fallback,
        Duration::from_secs(settings.generation.timeout_s),
    ));
    tracing::info!(
        primary = %settings.generation.primary,
        fallback = settings.generation.fallback.as_deref().unwrap_or("-"),
        "Generators initialized"
    );

    // =================================================================
    // Extractor
    // =================================================================
    let extractor: Arc<dyn TextExtractor> = Arc::new(RemoteTextExtractor::new(
        settings.extraction.base_url.clone(),
        settings
            .extraction
            .api_key_env
            .as_ref()
            .and_then(|env| std::env::var(env).ok()),
        Duration::from_secs(settings.extraction.timeout_s),
    )?);

    // =================================================================
    // Auth
    // =================================================================
    let auth_verifier = Arc::new(AuthVerifier::new(settings.auth.jwt_secret()?));
    tracing::info!("Auth verifier initialized");

    // =================================================================
    // Core components
    // =================================================================
    let ledger = Arc::new(CreditLedger::new(Arc::clone(&meta)));
    let planner = Arc::new(QueryPlanner::new(
        Arc::clone(&embedder),
        Arc::clone(&vector),
        Arc::clone(&cache),
        settings.retrieval.k_default,
        settings.retrieval.threshold_default,
        settings.retrieval.oversample,
    ));
    let composer = Arc::new(AnswerComposer::new(generator, Arc::clone(&meta)));
    let query_service = Arc::new(QueryService::new(
        Arc::clone(&meta),
        planner,
        composer,
        Arc::clone(&ledger),
        Arc::clone(&cache),
        Arc::clone(&settings),
    ));

    // =================================================================
    // Ingestion worker pool + sweeper
    // =================================================================
    let (queue, rx) = IngestQueue::new();
    let worker = Arc::new(IngestWorker::new(
        Arc::clone(&meta),
        Arc::clone(&blob),
        extractor,
        embedder,
        Arc::clone(&vector),
        PassageChunker::new(ChunkerConfig::from(&settings.chunking)),
        queue.clone(),
        Duration::from_secs(settings.worker.job_timeout_s),
        settings.embedding.batch_size,
    ));
    let _workers = IngestWorker::spawn_pool(worker, rx, settings.worker.ingest_parallelism);
    let _sweeper = spawn_sweeper(
        Arc::clone(&meta),
        queue.clone(),
        Duration::from_secs(settings.worker.sweep_interval_s),
        settings.worker.stale_processing_s,
    );
    tracing::info!(
        parallelism = settings.worker.ingest_parallelism,
        "Ingestion workers started"
    );

    // =================================================================
    // HTTP server
    // =================================================================
    let state = AppState {
        settings: Arc::clone(&settings),
        meta,
        blob,
        queue,
        ledger,
        query_service,
        auth_verifier,
    };

    let app = app_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::AdapterUnavailable {
            adapter: "listener",
            message: format!("cannot bind {}: {}", addr, e),
            refund_txn_id: None,
        })?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
