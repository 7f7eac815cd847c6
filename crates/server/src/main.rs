//! Incident-intelligence server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use incident_config::{
    load_settings, EmbeddingBackend, GeneratorBackend, Settings, VectorBackend,
};
use incident_core::{Embedder, Generator, IncidentReader, VectorIndex};
use incident_corpus::{CorpusManager, IngestSource, IngestionPipeline};
use incident_engine::{EngineConfig, GroundedAnswerer, RagEngine};
use incident_index::SparseIndex;
use incident_llm::{HttpGenerator, HttpGeneratorConfig, ScriptedGenerator};
use incident_rag::{
    CachedEmbedder, EntityExtractor, GeminiEmbedder, GeminiEmbedderConfig, HybridRetriever,
    InMemoryIndex, QdrantIndex, QdrantIndexConfig, QueryRouter, RetrieverConfig,
    SemanticValidator, TokenBucket, ValidatorConfig,
};
use incident_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env} > config/default > built-in defaults.
    let env = std::env::var("INCIDENT_INTEL_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialised, use eprintln for early logging.
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);

    tracing::info!(
        "Starting incident-intel server v{}",
        env!("CARGO_PKG_VERSION")
    );
    tracing::info!(
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "configuration loaded"
    );

    // One token bucket guards every outbound provider call.
    let limiter = {
        let rate_limit = &settings.server.rate_limit;
        if rate_limit.enabled {
            Arc::new(TokenBucket::new(
                rate_limit.bucket_size,
                rate_limit.refill_per_sec,
                rate_limit.max_backlog,
            ))
        } else {
            Arc::new(TokenBucket::unlimited())
        }
    };

    // Providers behind the capability traits.
    let embedder = build_embedder(&settings, &limiter);
    let vector = build_vector_index(&settings).await;
    let generator = build_generator(&settings)?;

    // Corpus and the derived indices.
    let sparse = Arc::new(SparseIndex::new());
    let corpus = Arc::new(CorpusManager::new(
        Arc::clone(&embedder),
        Arc::clone(&vector),
        Arc::clone(&sparse),
    ));

    if let Some(ref seed_path) = settings.corpus.seed_path {
        seed_corpus(&corpus, seed_path).await;
    }

    // The pipeline: router, retriever, validator, grounded generator.
    let reader: Arc<dyn IncidentReader> = corpus.clone();
    let extractor = Arc::new(EntityExtractor::default());

    let router = QueryRouter::new(Arc::clone(&reader), Arc::clone(&extractor))
        .with_default_floor(settings.retrieval.confidence_floor);
    let retriever = HybridRetriever::new(
        embedder,
        vector,
        sparse,
        Arc::clone(&extractor),
        Arc::clone(&reader),
        RetrieverConfig {
            overfetch_factor: settings.retrieval.overfetch_factor,
        },
    );
    let validator = SemanticValidator::new(
        reader,
        extractor,
        ValidatorConfig {
            strong_fused_threshold: settings.retrieval.strong_fused_threshold,
            composite_floor: settings.retrieval.composite_floor,
        },
    );
    let answerer = GroundedAnswerer::new(generator, limiter);

    let engine = Arc::new(RagEngine::new(
        Arc::clone(&corpus),
        router,
        retriever,
        validator,
        answerer,
        EngineConfig {
            deadline: Duration::from_millis(settings.server.request_deadline_ms),
            degraded_confidence_factor: settings.retrieval.degraded_confidence_cap,
        },
    ));

    let port = settings.server.port;
    let state = AppState::new(settings, engine, corpus);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

/// Initialise tracing with EnvFilter and optional JSON output.
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("incident={level},tower_http=info").into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// Embedding provider: hosted client when configured, hashed features
/// otherwise. Either way the content-addressed cache wraps it.
fn build_embedder(settings: &Settings, limiter: &Arc<TokenBucket>) -> Arc<dyn Embedder> {
    let embedding = &settings.embedding;

    let inner: Arc<dyn Embedder> = match (embedding.backend, embedding.api_key.clone()) {
        (EmbeddingBackend::Gemini, Some(api_key)) => {
            match GeminiEmbedder::new(GeminiEmbedderConfig {
                endpoint: embedding.endpoint.clone(),
                api_key,
                model: embedding.model.clone(),
                dimension: embedding.dimension,
                task_type: embedding.task_type.clone(),
                timeout: Duration::from_secs(15),
            }) {
                Ok(client) => {
                    tracing::info!(model = %embedding.model, "using hosted embedding provider");
                    Arc::new(client.with_limiter(Arc::clone(limiter)))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "hosted embedder unavailable, using hashed features");
                    Arc::new(incident_rag::HashedEmbedder::new(embedding.dimension))
                }
            }
        }
        _ => {
            tracing::info!(dimension = embedding.dimension, "using hashed offline embedder");
            Arc::new(incident_rag::HashedEmbedder::new(embedding.dimension))
        }
    };

    Arc::new(CachedEmbedder::new(
        inner,
        Duration::from_secs(embedding.cache_ttl_secs),
    ))
}

/// Vector index: Qdrant when configured and reachable, in-memory otherwise.
async fn build_vector_index(settings: &Settings) -> Arc<dyn VectorIndex> {
    match settings.vector_index.backend {
        VectorBackend::Qdrant => {
            let config = QdrantIndexConfig {
                endpoint: settings.vector_index.endpoint.clone(),
                collection: settings.vector_index.collection.clone(),
                dimension: settings.embedding.dimension,
                api_key: settings.vector_index.api_key.clone(),
            };
            match QdrantIndex::connect(config).await {
                Ok(index) => {
                    tracing::info!(
                        endpoint = %settings.vector_index.endpoint,
                        collection = %settings.vector_index.collection,
                        "connected to Qdrant"
                    );
                    Arc::new(index)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Qdrant unavailable, falling back to in-memory index");
                    Arc::new(InMemoryIndex::new(settings.embedding.dimension))
                }
            }
        }
        VectorBackend::Memory => Arc::new(InMemoryIndex::new(settings.embedding.dimension)),
    }
}

fn build_generator(settings: &Settings) -> anyhow::Result<Arc<dyn Generator>> {
    match settings.generator.backend {
        GeneratorBackend::Http => {
            let generator = HttpGenerator::new(HttpGeneratorConfig {
                endpoint: settings.generator.endpoint.clone(),
                api_key: settings.generator.api_key.clone(),
                model: settings.generator.model.clone(),
                max_tokens: settings.generator.max_tokens,
                temperature: settings.generator.temperature,
                timeout: Duration::from_secs(settings.generator.timeout_secs),
                ..HttpGeneratorConfig::default()
            })?;
            tracing::info!(model = %settings.generator.model, "using HTTP generative provider");
            Ok(Arc::new(generator))
        }
        GeneratorBackend::Scripted => {
            tracing::info!("using scripted generator (no generative provider configured)");
            Ok(Arc::new(ScriptedGenerator::new()))
        }
    }
}

/// Load a JSON incident export into the corpus at startup.
async fn seed_corpus(corpus: &Arc<CorpusManager>, seed_path: &str) {
    let pipeline = IngestionPipeline::new(Arc::clone(corpus));
    match tokio::fs::read_to_string(seed_path).await {
        Ok(data) => match pipeline.ingest(IngestSource::Json(data)).await {
            Ok(report) => {
                tracing::info!(
                    path = seed_path,
                    admitted = report.admitted,
                    quarantined = report.quarantined.len(),
                    "corpus seeded"
                );
            }
            Err(e) => tracing::warn!(path = seed_path, error = %e, "corpus seed failed"),
        },
        Err(e) => tracing::warn!(path = seed_path, error = %e, "corpus seed file unreadable"),
    }
}
