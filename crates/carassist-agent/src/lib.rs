//! carassist-agent
//!
//! Streaming transport for the assistant: the per-request relay queue, the
//! final-answer marker filter, the response coordinator, conversation history,
//! the tool registry and the Ollama-backed generator.
pub mod coordinator;
pub mod filter;
pub mod generator;
pub mod history;
pub mod relay;
pub mod tools;

pub use coordinator::{
    GenerationRequest, Generator, PhaseTracker, ResponseStream, StreamCoordinator, StreamError, StreamPhase,
    StreamRequest, TokenSink, DEFAULT_MARKER,
};
pub use filter::MarkerFilter;
pub use generator::{parse_chat_line, ChatDelta, OllamaGenerator, OllamaMessage};
pub use history::{history_from_settings, recent_window, ChatMessage, HistoryStore, InMemoryHistory, RestHistoryStore, Role};
pub use relay::{relay_queue, RelayConsumer, RelayItem, RelayProducer};
pub use tools::{KnowledgeTool, Tool, ToolRegistry, KNOWLEDGE_TOOL_NAME};
