use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use entropy_models::{Document, FusedHit, RetrievalHit};

use crate::lexical::LexicalIndex;
use crate::semantic::SemanticIndex;

/// Fuses the lexical and semantic rankers via weighted reciprocal-rank
/// fusion. Default weights 2:1 in favor of the semantic ranker, chosen
/// from an earlier offline evaluation.
pub struct HybridRetriever {
    lexical: Option<Arc<LexicalIndex>>,
    semantic: Option<Arc<SemanticIndex>>,
    lexical_weight: f64,
    semantic_weight: f64,
    rrf_k: u32,
}

pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 2.0;
pub const DEFAULT_LEXICAL_WEIGHT: f64 = 1.0;
pub const DEFAULT_RRF_K: u32 = 60;

impl HybridRetriever {
    pub fn new(lexical: Option<Arc<LexicalIndex>>, semantic: Option<Arc<SemanticIndex>>) -> Self {
        Self {
            lexical,
            semantic,
            lexical_weight: DEFAULT_LEXICAL_WEIGHT,
            semantic_weight: DEFAULT_SEMANTIC_WEIGHT,
            rrf_k: DEFAULT_RRF_K,
        }
    }

    pub fn with_weights(mut self, lexical_weight: f64, semantic_weight: f64, rrf_k: u32) -> Self {
        self.lexical_weight = lexical_weight;
        self.semantic_weight = semantic_weight;
        self.rrf_k = rrf_k;
        self
    }

    /// Whether at least one underlying index is loaded.
    pub fn is_available(&self) -> bool {
        self.lexical.is_some() || self.semantic.is_some()
    }

    pub fn num_documents(&self) -> usize {
        self.semantic
            .as_ref()
            .map(|s| s.len())
            .or_else(|| self.lexical.as_ref().map(|l| l.len()))
            .unwrap_or(0)
    }

    pub fn document(&self, doc_id: &str) -> Option<Document> {
        if let Some(semantic) = &self.semantic {
            if let Some(doc) = semantic.document(doc_id) {
                return Some(doc.clone());
            }
        }
        self.lexical
            .as_ref()
            .and_then(|l| l.document(doc_id).cloned())
    }

    /// Fused top-k for `query`. Both indexes are queried concurrently with
    /// `k_each = max(2k, 20)`; the ticker filter is applied by each index
    /// before fusion. Guarantees: at most `k` results, unique documents,
    /// ordered by fused score desc, then lower semantic rank, then id.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        tickers: Option<&BTreeSet<String>>,
    ) -> Vec<FusedHit> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        match (&self.lexical, &self.semantic) {
            (None, None) => {
                warn!("No retrieval index loaded, returning no hits");
                Vec::new()
            }
            (Some(lexical), None) => {
                let hits = run_lexical(Arc::clone(lexical), query, k, tickers).await;
                hits.into_iter()
                    .map(|h| FusedHit {
                        doc_id: h.doc_id,
                        score: h.score,
                        lexical_rank: Some(h.rank),
                        semantic_rank: None,
                    })
                    .collect()
            }
            (None, Some(semantic)) => {
                let hits = run_semantic(Arc::clone(semantic), query, k, tickers).await;
                hits.into_iter()
                    .map(|h| FusedHit {
                        doc_id: h.doc_id,
                        score: h.score,
                        lexical_rank: None,
                        semantic_rank: Some(h.rank),
                    })
                    .collect()
            }
            (Some(lexical), Some(semantic)) => {
                let k_each = (2 * k).max(20);
                let (lexical_hits, semantic_hits) = tokio::join!(
                    run_lexical(Arc::clone(lexical), query, k_each, tickers),
                    run_semantic(Arc::clone(semantic), query, k_each, tickers),
                );
                let fused = self.fuse(&lexical_hits, &semantic_hits, k);
                debug!(
                    query,
                    lexical = lexical_hits.len(),
                    semantic = semantic_hits.len(),
                    fused = fused.len(),
                    "Hybrid search"
                );
                fused
            }
        }
    }

    fn fuse(&self, lexical: &[RetrievalHit], semantic: &[RetrievalHit], k: usize) -> Vec<FusedHit> {
        let mut scores: HashMap<&str, FusedHit> = HashMap::new();
        let rrf_k = self.rrf_k as f64;

        for hit in lexical {
            let entry = scores.entry(&hit.doc_id).or_insert_with(|| FusedHit {
                doc_id: hit.doc_id.clone(),
                score: 0.0,
                lexical_rank: None,
                semantic_rank: None,
            });
            entry.score += self.lexical_weight / (rrf_k + hit.rank as f64);
            entry.lexical_rank = Some(hit.rank);
        }
        for hit in semantic {
            let entry = scores.entry(&hit.doc_id).or_insert_with(|| FusedHit {
                doc_id: hit.doc_id.clone(),
                score: 0.0,
                lexical_rank: None,
                semantic_rank: None,
            });
            entry.score += self.semantic_weight / (rrf_k + hit.rank as f64);
            entry.semantic_rank = Some(hit.rank);
        }

        let mut fused: Vec<FusedHit> = scores.into_values().collect();
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = a.semantic_rank.unwrap_or(usize::MAX);
                    let rb = b.semantic_rank.unwrap_or(usize::MAX);
                    ra.cmp(&rb)
                })
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        fused.truncate(k);
        fused
    }
}

async fn run_lexical(
    index: Arc<LexicalIndex>,
    query: &str,
    k: usize,
    tickers: Option<&BTreeSet<String>>,
) -> Vec<RetrievalHit> {
    let query = query.to_string();
    let filter = tickers.cloned();
    tokio::task::spawn_blocking(move || index.search(&query, k, filter.as_ref()))
        .await
        .unwrap_or_default()
}

async fn run_semantic(
    index: Arc<SemanticIndex>,
    query: &str,
    k: usize,
    tickers: Option<&BTreeSet<String>>,
) -> Vec<RetrievalHit> {
    let query = query.to_string();
    let filter = tickers.cloned();
    tokio::task::spawn_blocking(move || index.search(&query, k, filter.as_ref()))
        .await
        .unwrap_or_default()
}
