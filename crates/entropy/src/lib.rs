//! ENTROPY - multi-agent financial intelligence over U.S. equities.
//!
//! Answers free-text questions by combining hybrid retrieval over a news
//! corpus with live market-data lookups, routed across a cost-tiered pool
//! of LLM agents. The cheap generalist fronts most queries; specialists
//! run in a bounded worker pool with a TTL'd result cache and predictive
//! pre-fetch for likely follow-ups.

pub mod server;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use entropy_agents::{LlmClient, LlmTransport, Orchestrator, SessionStore, ToolBelt};
use entropy_market::QuoteProvider;
use entropy_models::EntropyConfig;
use entropy_retrieval::{Embedder, HybridRetriever, LexicalIndex, SemanticIndex};

/// Fully wired system plus the handles the diagnostic surface needs.
pub struct EntropyApp {
    pub orchestrator: Arc<Orchestrator>,
    pub retriever: Arc<HybridRetriever>,
    pub quotes: Arc<dyn QuoteProvider>,
    pub config: EntropyConfig,
}

/// Load the prebuilt retrieval indexes read-only. A missing artifact
/// degrades that index to absent; the hybrid retriever carries on with
/// whatever loaded.
pub fn load_retriever(
    config: &EntropyConfig,
    embedder: Arc<dyn Embedder>,
) -> Arc<HybridRetriever> {
    let lexical = match LexicalIndex::load(Path::new(&config.retrieval.lexical_path)) {
        Ok(index) => Some(Arc::new(index)),
        Err(e) => {
            warn!(path = %config.retrieval.lexical_path, error = %e, "Lexical index unavailable");
            None
        }
    };
    let semantic = match SemanticIndex::load(
        Path::new(&config.retrieval.semantic_meta_path),
        Path::new(&config.retrieval.semantic_vectors_path),
        embedder,
    ) {
        Ok(index) => Some(Arc::new(index)),
        Err(e) => {
            warn!(path = %config.retrieval.semantic_meta_path, error = %e, "Semantic index unavailable");
            None
        }
    };

    Arc::new(
        HybridRetriever::new(lexical, semantic).with_weights(
            config.retrieval.lexical_weight,
            config.retrieval.semantic_weight,
            config.retrieval.rrf_k,
        ),
    )
}

/// Wire the full system from explicit dependencies. The binary passes the
/// production transport/embedder/quotes; tests pass scripted ones.
pub fn build_app(
    config: EntropyConfig,
    transport: Arc<dyn LlmTransport>,
    retriever: Arc<HybridRetriever>,
    quotes: Arc<dyn QuoteProvider>,
) -> EntropyApp {
    let client = Arc::new(LlmClient::new(transport, config.llm.max_retries));
    let toolbelt = Arc::new(ToolBelt::new(Arc::clone(&retriever), Arc::clone(&quotes)));
    let sessions = Arc::new(SessionStore::new());
    let orchestrator = Arc::new(Orchestrator::new(
        client,
        toolbelt,
        sessions,
        config.llm.clone(),
        &config.pool,
    ));

    info!(
        workers = config.pool.max_workers,
        documents = retriever.num_documents(),
        "ENTROPY app wired"
    );
    EntropyApp {
        orchestrator,
        retriever,
        quotes,
        config,
    }
}
