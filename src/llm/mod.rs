pub mod openai;

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationFormat {
    Text,
    /// Ask the provider for a structured JSON object instead of prose.
    Json,
}

#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: Option<u32>,
    pub format: GenerationFormat,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>, max_output_tokens: Option<u32>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens,
            format: GenerationFormat::Text,
        }
    }

    pub fn structured(prompt: impl Into<String>, max_output_tokens: Option<u32>) -> Self {
        Self {
            prompt: prompt.into(),
            max_output_tokens,
            format: GenerationFormat::Json,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Generated {
    Text(String),
    Structured(Value),
}

impl Generated {
    pub fn into_text(self) -> String {
        match self {
            Generated::Text(text) => text,
            Generated::Structured(value) => value.to_string(),
        }
    }
}

/// Failure of a generation call. No partial or streaming result exists;
/// callers surface this as a dismissible error, never a crash.
#[derive(Debug)]
pub enum GenerationError {
    Http {
        status: Option<u16>,
        message: String,
    },
    Malformed {
        message: String,
    },
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::Http {
                status: Some(status),
                message,
            } => write!(f, "generation request failed: HTTP {status} {message}"),
            GenerationError::Http {
                status: None,
                message,
            } => write!(f, "generation request failed: {message}"),
            GenerationError::Malformed { message } => {
                write!(f, "generation response malformed: {message}")
            }
        }
    }
}

impl std::error::Error for GenerationError {}

/// Text-generation boundary: prompt in, generated text or structured fields
/// out, one call.
pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError>;
}
