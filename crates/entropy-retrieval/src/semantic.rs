use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use entropy_models::{Document, RetrievalHit};

use crate::embedder::Embedder;
use crate::error::RetrievalError;

/// Floor on the candidate pool drawn before ticker filtering, so a narrow
/// filter still sees enough of the ranking to preserve recall.
const MIN_CANDIDATE_POOL: usize = 50;

/// Dense-embedding ranker.
///
/// Vectors are L2-normalized at insert and query time, so similarity is a
/// plain inner product. The scan is exact; the `Embedder` seam is where an
/// approximate backend would plug in without changing callers.
pub struct SemanticIndex {
    docs: Vec<Document>,
    vectors: Vec<Vec<f32>>,
    dimension: usize,
    embedder: Arc<dyn Embedder>,
}

/// Metadata artifact persisted alongside the dense-vector file.
#[derive(Serialize, Deserialize)]
struct SemanticMeta {
    dimension: usize,
    docs: Vec<Document>,
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn embeddable_text(doc: &Document) -> String {
    format!("{}\n{}", doc.title, doc.body)
}

impl SemanticIndex {
    pub fn build(docs: Vec<Document>, embedder: Arc<dyn Embedder>) -> Result<Self, RetrievalError> {
        let dimension = embedder.dimension();
        let mut vectors = Vec::with_capacity(docs.len());
        for doc in &docs {
            let vector = embedder.embed(&embeddable_text(doc))?;
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    got: vector.len(),
                });
            }
            vectors.push(l2_normalize(vector));
        }
        info!(documents = docs.len(), dimension, "Built semantic index");
        Ok(Self {
            docs,
            vectors,
            dimension,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn document(&self, doc_id: &str) -> Option<&Document> {
        self.docs.iter().find(|d| d.id == doc_id)
    }

    /// Top-k hits by inner product, with the same filter and tie-break
    /// semantics as the lexical index. When a ticker filter is applied,
    /// `max(k * 10, 50)` candidates are drawn before filtering.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        tickers: Option<&BTreeSet<String>>,
    ) -> Vec<RetrievalHit> {
        if query.trim().is_empty() || self.docs.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(query) {
            Ok(v) => l2_normalize(v),
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, returning no hits");
                return Vec::new();
            }
        };

        let mut scored: Vec<(f64, &Document)> = self
            .vectors
            .iter()
            .zip(&self.docs)
            .map(|(vector, doc)| {
                let sim: f32 = vector.iter().zip(&query_vector).map(|(a, b)| a * b).sum();
                (sim as f64, doc)
            })
            .collect();

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| da.id.cmp(&db.id))
        });

        if tickers.is_some() {
            scored.truncate((k * 10).max(MIN_CANDIDATE_POOL));
        }
        if let Some(filter) = tickers {
            scored.retain(|(_, doc)| doc.matches_tickers(filter));
        }

        let hits: Vec<RetrievalHit> = scored
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, (score, doc))| RetrievalHit {
                doc_id: doc.id.clone(),
                score,
                rank: i + 1,
            })
            .collect();

        debug!(query, results = hits.len(), "Semantic search");
        hits
    }

    /// Persist as two paired artifacts: JSON metadata and a bincode vector
    /// file.
    pub fn save(&self, meta_path: &Path, vectors_path: &Path) -> Result<(), RetrievalError> {
        let meta = SemanticMeta {
            dimension: self.dimension,
            docs: self.docs.clone(),
        };
        std::fs::write(meta_path, serde_json::to_vec(&meta)?)?;
        std::fs::write(vectors_path, bincode::serialize(&self.vectors)?)?;
        info!(
            meta = %meta_path.display(),
            vectors = %vectors_path.display(),
            documents = self.docs.len(),
            "Saved semantic index"
        );
        Ok(())
    }

    pub fn load(
        meta_path: &Path,
        vectors_path: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrievalError> {
        let meta: SemanticMeta = serde_json::from_slice(&std::fs::read(meta_path)?)?;
        let vectors: Vec<Vec<f32>> = bincode::deserialize(&std::fs::read(vectors_path)?)?;

        if embedder.dimension() != meta.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: meta.dimension,
                got: embedder.dimension(),
            });
        }
        if vectors.len() != meta.docs.len() {
            return Err(RetrievalError::Decode(format!(
                "vector count {} does not match document count {}",
                vectors.len(),
                meta.docs.len()
            )));
        }

        info!(documents = meta.docs.len(), "Loaded semantic index");
        Ok(Self {
            docs: meta.docs,
            vectors,
            dimension: meta.dimension,
            embedder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, title: &str, body: &str, tickers: &[&str]) -> Document {
        Document {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap(),
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            publisher: "Newswire".to_string(),
            link: format!("https://example.com/{id}"),
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc(
                "art-001",
                "Apple iPhone sales surge",
                "Apple iPhone sales beat expectations across regions.",
                &["AAPL"],
            ),
            doc(
                "art-002",
                "Tesla deliveries disappoint",
                "Tesla vehicle deliveries missed analyst estimates.",
                &["TSLA"],
            ),
            doc(
                "art-003",
                "Apple services revenue grows",
                "Apple services posted another record quarter.",
                &["AAPL"],
            ),
        ]
    }

    fn index() -> SemanticIndex {
        SemanticIndex::build(corpus(), Arc::new(HashingEmbedder::new(128))).unwrap()
    }

    #[test]
    fn similar_text_ranks_first() {
        let idx = index();
        let hits = idx.search("Tesla vehicle deliveries", 2, None);
        assert_eq!(hits[0].doc_id, "art-002");
    }

    #[test]
    fn filter_restricts_to_ticker() {
        let idx = index();
        let filter = BTreeSet::from(["AAPL".to_string()]);
        let hits = idx.search("sales revenue quarter", 3, Some(&filter));
        assert!(!hits.is_empty());
        for hit in &hits {
            assert!(idx.document(&hit.doc_id).unwrap().tickers.contains("AAPL"));
        }
    }

    #[test]
    fn empty_query_and_empty_index() {
        let idx = index();
        assert!(idx.search("", 5, None).is_empty());

        let empty = SemanticIndex::build(Vec::new(), Arc::new(HashingEmbedder::new(128))).unwrap();
        assert!(empty.search("apple", 5, None).is_empty());
    }

    #[test]
    fn vectors_are_normalized() {
        let idx = index();
        for vector in &idx.vectors {
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
        }
    }

    #[test]
    fn save_load_roundtrip_preserves_ranking() {
        let idx = index();
        let before = idx.search("apple revenue", 3, None);

        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("semantic_index.json");
        let vectors = dir.path().join("semantic_index.vec");
        idx.save(&meta, &vectors).unwrap();

        let reloaded =
            SemanticIndex::load(&meta, &vectors, Arc::new(HashingEmbedder::new(128))).unwrap();
        let after = reloaded.search("apple revenue", 3, None);
        assert_eq!(before, after);
    }

    #[test]
    fn load_rejects_dimension_mismatch() {
        let idx = index();
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("semantic_index.json");
        let vectors = dir.path().join("semantic_index.vec");
        idx.save(&meta, &vectors).unwrap();

        let result = SemanticIndex::load(&meta, &vectors, Arc::new(HashingEmbedder::new(64)));
        assert!(matches!(
            result,
            Err(RetrievalError::DimensionMismatch { .. })
        ));
    }
}
