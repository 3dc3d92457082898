use serde::{Deserialize, Serialize};

/// Top-level configuration for ENTROPY.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntropyConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Configuration for the specialist worker pool and its result cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Bounded number of concurrently running specialist tasks.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Absolute TTL in seconds for cached specialist results.
    #[serde(default = "default_result_ttl")]
    pub result_ttl_seconds: u64,
    /// Wall-clock budget for an immediate specialist on the query path.
    #[serde(default = "default_immediate_timeout")]
    pub immediate_timeout_seconds: u64,
    /// Soft bound on queued (not yet running) tasks. When full, the oldest
    /// unconsumed pre-fetch is shed; immediates are never shed.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            result_ttl_seconds: default_result_ttl(),
            immediate_timeout_seconds: default_immediate_timeout(),
            queue_depth: default_queue_depth(),
        }
    }
}

impl PoolConfig {
    /// Apply the SPECIALIST_* environment overrides on top of file config.
    pub fn apply_env_overrides(&mut self) {
        if let Some(workers) = env_parse("SPECIALIST_MAX_WORKERS") {
            self.max_workers = workers;
        }
        if let Some(ttl) = env_parse("SPECIALIST_TTL_SECONDS") {
            self.result_ttl_seconds = ttl;
        }
        if let Some(timeout) = env_parse("SPECIALIST_TIMEOUT_SECONDS") {
            self.immediate_timeout_seconds = timeout;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Model tiers and provider settings for the LLM client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Cheap tier: fronts 80-90% of queries.
    #[serde(default = "default_generalist_model")]
    pub generalist_model: String,
    /// Expensive tier: deep quantitative analysis.
    #[serde(default = "default_market_model")]
    pub market_model: String,
    /// Mid tier: narrative news synthesis.
    #[serde(default = "default_news_model")]
    pub news_model: String,
    /// Transport retries after the first failed provider call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            generalist_model: default_generalist_model(),
            market_model: default_market_model(),
            news_model: default_news_model(),
            max_retries: default_max_retries(),
        }
    }
}

/// Paths to the prebuilt retrieval artifacts plus fusion parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    #[serde(default = "default_lexical_path")]
    pub lexical_path: String,
    #[serde(default = "default_semantic_meta_path")]
    pub semantic_meta_path: String,
    #[serde(default = "default_semantic_vectors_path")]
    pub semantic_vectors_path: String,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_path: default_lexical_path(),
            semantic_meta_path: default_semantic_meta_path(),
            semantic_vectors_path: default_semantic_vectors_path(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_result_ttl() -> u64 {
    300
}
fn default_immediate_timeout() -> u64 {
    30
}
fn default_queue_depth() -> usize {
    8
}
fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_generalist_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_market_model() -> String {
    "claude-opus-4-20250514".to_string()
}
fn default_news_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_retries() -> u32 {
    1
}
fn default_lexical_path() -> String {
    "data/lexical_index.json".to_string()
}
fn default_semantic_meta_path() -> String {
    "data/semantic_index.json".to_string()
}
fn default_semantic_vectors_path() -> String {
    "data/semantic_index.vec".to_string()
}
fn default_semantic_weight() -> f64 {
    2.0
}
fn default_lexical_weight() -> f64 {
    1.0
}
fn default_rrf_k() -> u32 {
    60
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = EntropyConfig::default();
        assert_eq!(config.pool.max_workers, 4);
        assert_eq!(config.pool.result_ttl_seconds, 300);
        assert_eq!(config.pool.immediate_timeout_seconds, 30);
        assert_eq!(config.retrieval.semantic_weight, 2.0);
        assert_eq!(config.retrieval.lexical_weight, 1.0);
        assert_eq!(config.retrieval.rrf_k, 60);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[pool]
max_workers = 2
immediate_timeout_seconds = 10

[llm]
generalist_model = "claude-3-5-haiku-latest"

[server]
port = 9001
"#;
        let config: EntropyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.pool.max_workers, 2);
        assert_eq!(config.pool.immediate_timeout_seconds, 10);
        // Omitted fields fall back to defaults.
        assert_eq!(config.pool.result_ttl_seconds, 300);
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.bind_addr(), "127.0.0.1:9001");
    }

    #[test]
    fn roundtrip_config() {
        let config = EntropyConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: EntropyConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn env_overrides_apply() {
        let mut pool = PoolConfig::default();
        std::env::set_var("SPECIALIST_MAX_WORKERS", "7");
        std::env::set_var("SPECIALIST_TTL_SECONDS", "120");
        std::env::set_var("SPECIALIST_TIMEOUT_SECONDS", "5");
        pool.apply_env_overrides();
        std::env::remove_var("SPECIALIST_MAX_WORKERS");
        std::env::remove_var("SPECIALIST_TTL_SECONDS");
        std::env::remove_var("SPECIALIST_TIMEOUT_SECONDS");

        assert_eq!(pool.max_workers, 7);
        assert_eq!(pool.result_ttl_seconds, 120);
        assert_eq!(pool.immediate_timeout_seconds, 5);
    }
}
