pub mod agent;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod prompts;
pub mod session_store;
pub mod test_support;
pub mod toolbelt;

pub use agent::{Agent, AgentRun, AgentSpec, MAX_STEPS};
pub use error::AgentError;
pub use llm::{ChatRequest, HttpTransport, LlmClient, LlmOutcome, LlmTransport, Message};
pub use orchestrator::{AgentSpecialistRunner, AgentTag, Orchestrator, QueryOutcome, SessionStats};
pub use policy::{build_task, Decision, DecisionPolicy};
pub use pool::{
    Priority, SpecialistFuture, SpecialistPool, SpecialistRunner, SpecialistStatus,
    SubmissionState,
};
pub use session_store::SessionStore;
pub use toolbelt::{extract_tickers, ToolBelt, ToolDefinition, ToolResult, TRACKED_TICKERS};
