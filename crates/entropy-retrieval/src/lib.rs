pub mod embedder;
pub mod error;
pub mod hybrid;
pub mod lexical;
pub mod semantic;

pub use embedder::{Embedder, HashingEmbedder};
#[cfg(feature = "fastembed-backend")]
pub use embedder::FastembedEmbedder;
pub use error::RetrievalError;
pub use hybrid::HybridRetriever;
pub use lexical::LexicalIndex;
pub use semantic::SemanticIndex;
