pub mod errors;
pub mod ids;
pub mod messages;
pub mod security;
pub mod source;
pub mod stream;

pub use errors::GatewayError;
pub use ids::{MessageId, SessionId};
pub use messages::{ChatCompletion, ChatPrompt, ChatReply, ChatRequest};
pub use source::{ChunkSource, ChunkStream};
pub use stream::StreamChunk;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
