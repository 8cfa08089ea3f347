use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use tunegraph_api::config::Config;
use tunegraph_api::db::{create_redis_client, DocumentStore, FeedCache, GraphStore};
use tunegraph_api::mapping::MappingConfig;
use tunegraph_api::routes::{create_router, AppState};
use tunegraph_api::services::{PreferenceAggregator, RecommendationService, ScoringWeights};
use tunegraph_api::sync::{RetryPolicy, SyncOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    // Explicit open/close lifecycle for every store client
    let documents = Arc::new(DocumentStore::connect(&config.database_url).await?);
    let graph = Arc::new(
        GraphStore::connect(
            &config.graph_uri,
            &config.graph_user,
            &config.graph_password,
            config.graph_pool_size,
        )
        .await?,
    );
    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_handle) = FeedCache::new(redis_client);
    let mapping = Arc::new(MappingConfig::default());

    let aggregator = Arc::new(PreferenceAggregator::new(
        documents.clone(),
        graph.clone(),
        graph.clone(),
        mapping.clone(),
        config.lookback_days,
        config.top_artists,
        config.completion_threshold,
        config.decay_half_life_days,
    ));

    let recommendations = Arc::new(RecommendationService::new(
        graph.clone(),
        documents.clone(),
        aggregator,
        cache,
        mapping.clone(),
        ScoringWeights {
            genre: config.weight_genre,
            artist: config.weight_artist,
            popularity: config.weight_popularity,
        },
        config.popular_ttl_secs,
        config.personal_ttl_secs,
    ));

    let sync = Arc::new(SyncOrchestrator::new(
        documents.clone(),
        graph,
        mapping,
        config.sync_batch_size,
        config.sync_workers,
        RetryPolicy::new(
            config.sync_max_retries,
            Duration::from_millis(config.sync_backoff_ms),
        ),
    ));

    let state = AppState {
        recommendations,
        sync: sync.clone(),
        jobs: Arc::new(RwLock::new(HashMap::new())),
        operator_token: config.operator_token.clone(),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "tunegraph-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wind down in dependency order: stop sync work, flush the cache
    // writer, release the document pool
    sync.request_cancel();
    cache_handle.shutdown().await;
    documents.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
