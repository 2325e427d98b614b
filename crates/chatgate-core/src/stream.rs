use crate::errors::GatewayError;

/// One fragment of a streamed response.
///
/// A well-formed stream carries exactly one terminal chunk (`done` or `error`)
/// as its last element. Sources may also simply end the stream, which consumers
/// treat as completion.
#[derive(Clone, Debug, Default)]
pub struct StreamChunk {
    pub text: String,
    pub done: bool,
    pub error: Option<GatewayError>,
}

impl StreamChunk {
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn failed(error: GatewayError) -> Self {
        Self {
            done: true,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }
}
