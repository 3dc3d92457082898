use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index artifact decode error: {0}")]
    Decode(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedder dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<serde_json::Error> for RetrievalError {
    fn from(e: serde_json::Error) -> Self {
        RetrievalError::Decode(e.to_string())
    }
}

impl From<bincode::Error> for RetrievalError {
    fn from(e: bincode::Error) -> Self {
        RetrievalError::Decode(e.to_string())
    }
}
