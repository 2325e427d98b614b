//! Streaming chat sources: provider adapters plus local echo and scripted
//! sources.

pub mod anthropic;
pub mod echo;
pub mod factory;
mod http;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod pump;
pub mod sse;

pub use anthropic::AnthropicSource;
pub use echo::EchoSource;
pub use factory::create_source;
pub use mock::{ScriptStep, ScriptedSource};
pub use ollama::OllamaSource;
pub use openai::OpenAiCompatSource;
