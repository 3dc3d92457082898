use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A news article in the retrieval corpus.
///
/// Documents are immutable once indexed. The lexical and semantic indexes
/// share document ids, and every document belongs to at least one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier shared across both retrieval indexes.
    pub id: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    /// Tickers this article covers. Never empty in a well-formed corpus.
    pub tickers: BTreeSet<String>,
    pub publisher: String,
    pub link: String,
}

impl Document {
    /// Whether this document covers any ticker in `filter`.
    pub fn matches_tickers(&self, filter: &BTreeSet<String>) -> bool {
        self.tickers.iter().any(|t| filter.contains(t))
    }
}

/// A ranked hit from a single retrieval method.
///
/// Scores are method-local (BM25 score vs. inner product) and must not be
/// compared across methods; ranks start at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub doc_id: String,
    pub score: f64,
    pub rank: usize,
}

/// A hit after weighted reciprocal-rank fusion of both methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedHit {
    pub doc_id: String,
    /// Combined RRF score (higher = more relevant).
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_document() -> Document {
        Document {
            id: "art-001".to_string(),
            title: "Apple beats earnings expectations".to_string(),
            body: "Apple reported quarterly revenue above estimates.".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 5, 2, 21, 0, 0).unwrap(),
            tickers: BTreeSet::from(["AAPL".to_string()]),
            publisher: "Newswire".to_string(),
            link: "https://example.com/art-001".to_string(),
        }
    }

    #[test]
    fn roundtrip_document() {
        let doc = sample_document();
        let json = serde_json::to_string(&doc).unwrap();
        let deserialized: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, deserialized);
    }

    #[test]
    fn matches_tickers_intersection() {
        let doc = sample_document();
        let filter = BTreeSet::from(["AAPL".to_string(), "MSFT".to_string()]);
        assert!(doc.matches_tickers(&filter));

        let miss = BTreeSet::from(["TSLA".to_string()]);
        assert!(!doc.matches_tickers(&miss));
    }

    #[test]
    fn fused_hit_tracks_source_ranks() {
        let hit = FusedHit {
            doc_id: "art-001".to_string(),
            score: 0.047,
            lexical_rank: Some(2),
            semantic_rank: None,
        };
        let json = serde_json::to_string(&hit).unwrap();
        let parsed: FusedHit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.lexical_rank, Some(2));
        assert_eq!(parsed.semantic_rank, None);
    }
}
