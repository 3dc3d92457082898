pub mod config;
pub mod document;
pub mod market;
pub mod session;
pub mod task;

pub use config::{EntropyConfig, LlmConfig, PoolConfig, RetrievalConfig, ServerConfig};
pub use document::{Document, FusedHit, RetrievalHit};
pub use market::{
    Fundamentals, PerformanceComparison, PerformanceEntry, Period, PriceChange, PriceHistory,
    PricePoint, PriceSnapshot, TechnicalReading,
};
pub use session::{
    Session, ToolRecord, Turn, TurnContent, TurnRole, UserProfile, BRIEF_RESPONSE_TOKENS,
};
pub use task::{fingerprint, Fingerprint, SpecialistKind, SpecialistResult, Task};
