use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::EntropyApp;

pub fn create_app(state: Arc<EntropyApp>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/diagnostic/{query}", get(diagnostic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// POST /chat - run one query through the orchestrated agent system.
async fn chat(
    State(state): State<Arc<EntropyApp>>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let session_id = request
        .session_id
        .unwrap_or_else(|| "default".to_string());
    info!(session_id, query = %truncate(&request.query, 50), "Chat request");

    match state
        .orchestrator
        .process_query(&request.query, &session_id)
        .await
    {
        Ok(outcome) => {
            info!(agent = outcome.agent.as_str(), cost = %outcome.cost_usd, "Chat response");
            Json(outcome).into_response()
        }
        Err(e) => {
            error!(error = %e, "Query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// GET /health - liveness probe.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /diagnostic/{query} - trace a query through the retrieval, market
/// data, and generation contexts without invoking any LLM.
async fn diagnostic(
    State(state): State<Arc<EntropyApp>>,
    Path(query): Path<String>,
) -> Json<Value> {
    debug!("[DIAGNOSTIC] Tracing query: {query}");
    let mut flow_trace = serde_json::Map::new();

    // Retrieval context.
    let hits = state.retriever.search(&query, 3, None).await;
    let mut tickers_found: Vec<String> = Vec::new();
    let mut sample_titles: Vec<String> = Vec::new();
    for hit in &hits {
        if let Some(doc) = state.retriever.document(&hit.doc_id) {
            for ticker in &doc.tickers {
                if !tickers_found.contains(ticker) {
                    tickers_found.push(ticker.clone());
                }
            }
            if sample_titles.len() < 2 {
                sample_titles.push(truncate(&doc.title, 50));
            }
        }
    }
    debug!("[DIAGNOSTIC] Retrieval returned {} hits", hits.len());
    flow_trace.insert(
        "retrieval".to_string(),
        json!({
            "success": state.retriever.is_available(),
            "num_results": hits.len(),
            "tickers_found": tickers_found,
            "sample_titles": sample_titles,
        }),
    );

    // Market data context.
    let market = match extract_first_ticker(&query) {
        Some(ticker) => {
            let snapshot = state.quotes.quote(&ticker).await;
            let price = snapshot.as_ref().and_then(|s| s.current_price);
            debug!("[DIAGNOSTIC] Market probe for {ticker}: {price:?}");
            json!({
                "success": snapshot.is_some(),
                "ticker_extracted": ticker,
                "data_available": price.is_some(),
                "current_price": price,
            })
        }
        None => json!({
            "success": false,
            "ticker_extracted": null,
            "data_available": false,
            "current_price": null,
        }),
    };
    flow_trace.insert("market_data".to_string(), market);

    // Generation context.
    flow_trace.insert(
        "generation".to_string(),
        json!({
            "orchestrator_ready": true,
            "specialist_pool_active": state.orchestrator.pool_active(),
        }),
    );

    Json(json!({ "query": query, "flow_trace": Value::Object(flow_trace) }))
}

/// GET / - API information.
async fn root() -> Json<Value> {
    Json(json!({
        "name": "ENTROPY",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "chat": "/chat (POST)",
            "health": "/health (GET)",
            "diagnostic": "/diagnostic/{query} (GET)",
        }
    }))
}

/// Ticker extraction for the diagnostic probe: `$AAPL` style first, then
/// bare uppercase symbols.
fn extract_first_ticker(query: &str) -> Option<String> {
    use std::sync::LazyLock;
    static DOLLAR: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\$([A-Z]{1,5})\b").unwrap());
    static BARE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"\b([A-Z]{2,5})\b").unwrap());

    DOLLAR
        .captures(query)
        .or_else(|| BARE.captures(query))
        .map(|c| c[1].to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serialization() {
        let response = HealthResponse {
            status: "ok",
            version: "0.1.0",
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"version\""));
    }

    #[test]
    fn chat_request_defaults_session_to_none() {
        let request: ChatRequest = serde_json::from_str(r#"{"query": "hi"}"#).unwrap();
        assert!(request.session_id.is_none());

        let request: ChatRequest =
            serde_json::from_str(r#"{"query": "hi", "session_id": "s1"}"#).unwrap();
        assert_eq!(request.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn extract_ticker_prefers_dollar_form() {
        assert_eq!(extract_first_ticker("what about $TSLA vs AAPL"), Some("TSLA".to_string()));
        assert_eq!(extract_first_ticker("price of AAPL today"), Some("AAPL".to_string()));
        assert_eq!(extract_first_ticker("hello there"), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 50), "short");
        let long = "a".repeat(60);
        assert_eq!(truncate(&long, 50).len(), 53);
    }
}
