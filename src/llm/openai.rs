use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

use super::{Generated, GenerationError, GenerationFormat, GenerationRequest, TextGenerator};

pub fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model_name: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(base_url: String, api_key: String, model_name: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model_name,
        }
    }
}

impl TextGenerator for OpenAiCompatibleProvider {
    fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError> {
        let url = chat_completions_url(&self.base_url);
        let body = ChatCompletionsRequest {
            model: self.model_name.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_output_tokens,
            response_format: match request.format {
                GenerationFormat::Text => None,
                GenerationFormat::Json => Some(ResponseFormat {
                    format_type: "json_object".to_string(),
                }),
            },
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| GenerationError::Http {
                status: None,
                message: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp.text().map_err(|e| GenerationError::Http {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(GenerationError::Http {
                status: Some(status.as_u16()),
                message: text,
            });
        }

        parse_chat_completion(&text, request.format)
    }
}

/// Extracts `choices[0].message.content` from a non-streaming chat
/// completions body. With `Json` requested, the content itself must parse
/// as a JSON object.
pub fn parse_chat_completion(
    body: &str,
    format: GenerationFormat,
) -> Result<Generated, GenerationError> {
    let value: Value = serde_json::from_str(body).map_err(|e| GenerationError::Malformed {
        message: format!("response is not JSON: {e}"),
    })?;
    let content = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| GenerationError::Malformed {
            message: "missing choices[0].message.content".to_string(),
        })?;

    match format {
        GenerationFormat::Text => Ok(Generated::Text(content.to_string())),
        GenerationFormat::Json => {
            let structured: Value =
                serde_json::from_str(content).map_err(|e| GenerationError::Malformed {
                    message: format!("structured content is not JSON: {e}"),
                })?;
            if !structured.is_object() {
                return Err(GenerationError::Malformed {
                    message: "structured content is not a JSON object".to_string(),
                });
            }
            Ok(Generated::Structured(structured))
        }
    }
}
