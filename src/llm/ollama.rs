//! Ollama chat backend.

use crate::llm::client::{LLMClient, LLMStream};
use crate::types::{AppError, Message, MessageRole, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    generation::chat::{request::ChatMessageRequest, ChatMessage},
    Ollama,
};

const DEFAULT_PORT: u16 = 11434;

/// Streaming chat client for Ollama.
pub struct OllamaClient {
    client: Ollama,
    model: String,
}

impl OllamaClient {
    /// Connect to `base_url`, e.g. `http://localhost:11434`.
    pub fn new(base_url: &str, model: String) -> Result<Self> {
        let (host, port) = split_base_url(base_url)?;
        let client = Ollama::new(host, port);
        Ok(Self { client, model })
    }
}

/// Split `scheme://host[:port][/...]` into (`scheme://host`, port).
pub(crate) fn split_base_url(base_url: &str) -> Result<(String, u16)> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let (scheme, rest) = match trimmed.split_once("://") {
        Some((scheme, rest)) => (scheme, rest),
        None => ("http", trimmed),
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                AppError::Configuration(format!("Invalid port in Ollama URL '{}'", base_url))
            })?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(AppError::Configuration(format!(
            "Invalid Ollama URL '{}'",
            base_url
        )));
    }

    Ok((format!("{}://{}", scheme, host), port))
}

fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role {
        MessageRole::System => ChatMessage::system(message.content.clone()),
        MessageRole::User => ChatMessage::user(message.content.clone()),
        MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn stream_chat(&self, messages: &[Message]) -> Result<LLMStream> {
        let chat_messages: Vec<ChatMessage> = messages.iter().map(to_chat_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), chat_messages);

        let mut stream_response = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| AppError::LLM(format!("Ollama stream error: {}", e)))?;

        let output_stream = stream! {
            while let Some(chunk_result) = stream_response.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let content = chunk.message.content;
                        if !content.is_empty() {
                            yield Ok(content);
                        }
                    }
                    Err(_) => {
                        yield Err(AppError::LLM("Ollama stream chunk error".to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::new(Box::pin(output_stream)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
