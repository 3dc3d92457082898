use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("LLM response parse error: {0}")]
    Parse(String),

    #[error("specialist pool is shut down")]
    PoolShutdown,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
