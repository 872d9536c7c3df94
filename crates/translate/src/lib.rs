//! Protocol adapters between inbound wire formats and the upstream chat
//! completion shape.
//!
//! OpenAI, Anthropic, and Ollama request bodies are normalized into one
//! upstream payload, and upstream responses are rendered back in the
//! matching outbound shape. All functions here are pure; streaming
//! translation is a synchronous state machine fed one SSE event at a time.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use ollama::OllamaMode;
pub use stream::OllamaStreamState;
