//! Server assembly: state construction and router wiring.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api::query::ConversationStore;
use crate::api::sources::SourceRegistry;
use crate::cache::{KvStore, MemoryStore, RedisStore, ResultCache};
use crate::config::AppConfig;
use crate::jobs::JobRunner;
use crate::llm::providers::create_provider;
use crate::pipeline::QueryPipeline;
use crate::schema::relevance::{OpenAiEmbeddings, SchemaRelevance};
use crate::{AppState, log_init_step};

/// Build the application router from configuration.
pub async fn create_app(config: AppConfig) -> anyhow::Result<Router> {
    let config = Arc::new(config);

    // Shared key/value store: Redis when configured, in-memory otherwise
    let store: Arc<dyn KvStore> = match config.redis.url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            log_init_step!(1, 4, "Store", "redis");
            Arc::new(store)
        }
        None => {
            log_init_step!(1, 4, "Store", "in-memory (no REDIS_URL)");
            Arc::new(MemoryStore::new())
        }
    };

    let provider = create_provider(config.llm.provider, &config.providers, &config.llm);
    log_init_step!(
        2,
        4,
        "LLM provider",
        format!(
            "{} ({})",
            provider.name(),
            if provider.is_configured() { "configured" } else { "no credentials" }
        )
    );

    // Relevance filtering needs an embedding key; without one the
    // pipeline always uses the full schema.
    let relevance = config.providers.openai.api_key.clone().map(|key| {
        let embeddings = OpenAiEmbeddings::new(
            key,
            config.providers.openai.base_url.clone(),
            config.query.embedding_model.clone(),
        );
        Arc::new(SchemaRelevance::new(
            Arc::new(embeddings),
            config.query.relevance_top_k,
        ))
    });
    log_init_step!(
        3,
        4,
        "Relevance filter",
        if relevance.is_some() { "enabled" } else { "disabled" }
    );

    let cache = ResultCache::new(store.clone(), config.query.cache_ttl_secs);
    let pipeline = Arc::new(QueryPipeline::new(
        provider,
        cache,
        relevance.clone(),
        config.query.clone(),
        config.llm.history_window,
    ));
    let jobs = JobRunner::new(store);
    log_init_step!(4, 4, "Pipeline", "ready");

    let state = AppState {
        config: config.clone(),
        pipeline,
        jobs,
        sources: Arc::new(SourceRegistry::new()),
        relevance,
        conversations: Arc::new(ConversationStore::new()),
    };

    Ok(crate::api::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.timeout_secs,
        )))
        .with_state(state))
}
