use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use entropy_models::{Document, RetrievalHit};

use crate::error::RetrievalError;

const K1: f64 = 1.5;
const B: f64 = 0.75;
/// Floor factor for negative idf values (Okapi can go negative for terms
/// present in more than half the corpus).
const IDF_EPSILON: f64 = 0.25;

/// BM25 keyword ranker over the static news corpus.
///
/// Ticker symbols are concatenated as a prefix to each document's text
/// before tokenization so exact symbol queries ("NVDA") score strongly.
/// Built offline, loaded read-only at startup; safe to share.
#[derive(Debug, Serialize, Deserialize)]
pub struct LexicalIndex {
    docs: Vec<Document>,
    tokenized_corpus: Vec<Vec<String>>,
    #[serde(skip)]
    stats: Bm25Stats,
}

#[derive(Debug, Default)]
struct Bm25Stats {
    doc_lens: Vec<usize>,
    avgdl: f64,
    idf: HashMap<String, f64>,
}

/// Lowercase, split on whitespace and punctuation, no stemming.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn indexable_text(doc: &Document) -> String {
    let tickers: Vec<&str> = doc.tickers.iter().map(String::as_str).collect();
    format!("{} {} {}", tickers.join(" "), doc.title, doc.body)
}

impl LexicalIndex {
    pub fn build(docs: Vec<Document>) -> Self {
        let tokenized_corpus: Vec<Vec<String>> =
            docs.iter().map(|d| tokenize(&indexable_text(d))).collect();
        let index = Self {
            docs,
            tokenized_corpus,
            stats: Bm25Stats::default(),
        };
        index.with_stats()
    }

    fn with_stats(mut self) -> Self {
        let n = self.tokenized_corpus.len();
        let doc_lens: Vec<usize> = self.tokenized_corpus.iter().map(Vec::len).collect();
        let avgdl = if n == 0 {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / n as f64
        };

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for tokens in &self.tokenized_corpus {
            let unique: BTreeSet<&String> = tokens.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
        }

        // Okapi idf with the rank_bm25 negative-idf floor.
        let mut idf: HashMap<String, f64> = HashMap::new();
        let mut idf_sum = 0.0;
        let mut negative: Vec<String> = Vec::new();
        for (term, df) in &doc_freq {
            let value = ((n as f64 - *df as f64 + 0.5) / (*df as f64 + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term.clone(), value);
        }
        if !doc_freq.is_empty() {
            let floor = IDF_EPSILON * (idf_sum / doc_freq.len() as f64).abs();
            for term in negative {
                idf.insert(term, floor);
            }
        }

        self.stats = Bm25Stats {
            doc_lens,
            avgdl,
            idf,
        };
        info!(documents = self.docs.len(), "Built lexical index");
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn document(&self, doc_id: &str) -> Option<&Document> {
        self.docs.iter().find(|d| d.id == doc_id)
    }

    /// Top-k hits for `query`, optionally restricted to documents whose
    /// ticker set intersects `tickers`. Ties break by ascending document id.
    /// An empty query or empty index yields an empty list, never an error.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        tickers: Option<&BTreeSet<String>>,
    ) -> Vec<RetrievalHit> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.docs.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &Document)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(idx, doc)| (self.score(&query_tokens, idx), doc))
            .collect();

        if let Some(filter) = tickers {
            scored.retain(|(_, doc)| doc.matches_tickers(filter));
        }

        scored.sort_by(|(sa, da), (sb, db)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| da.id.cmp(&db.id))
        });

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

        debug!(query, results = hits.len(), "Lexical search");
        hits
    }

    fn score(&self, query_tokens: &[String], doc_idx: usize) -> f64 {
        let tokens = &self.tokenized_corpus[doc_idx];
        let doc_len = self.stats.doc_lens[doc_idx] as f64;
        let mut freq: HashMap<&String, f64> = HashMap::new();
        for token in tokens {
            *freq.entry(token).or_default() += 1.0;
        }

        query_tokens
            .iter()
            .map(|term| {
                let tf = freq.get(term).copied().unwrap_or(0.0);
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = self.stats.idf.get(term).copied().unwrap_or(0.0);
                let norm = K1 * (1.0 - B + B * doc_len / self.stats.avgdl);
                idf * tf * (K1 + 1.0) / (tf + norm)
            })
            .sum()
    }

    /// Persist the tokenized corpus and documents as a single JSON artifact.
    pub fn save(&self, path: &Path) -> Result<(), RetrievalError> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), documents = self.docs.len(), "Saved lexical index");
        Ok(())
    }

    /// Load a previously saved artifact; statistics are recomputed
    /// deterministically from the stored corpus.
    pub fn load(path: &Path) -> Result<Self, RetrievalError> {
        let bytes = std::fs::read(path)?;
        let index: LexicalIndex = serde_json::from_slice(&bytes)?;
        info!(path = %path.display(), documents = index.docs.len(), "Loaded lexical index");
        Ok(index.with_stats())
    }
}
