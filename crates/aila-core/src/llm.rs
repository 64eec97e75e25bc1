//! Chat-style language model access.
//!
//! The digest talks to the model through [`TextOracle`] so tests can swap in
//! canned replies. [`OllamaClient`] is the production backend.

use std::future::Future;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, RuntimeConfig};
use crate::error::{CoreError, Result};

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System turn.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new("system", content)
    }

    /// User turn.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new("user", content)
    }

    /// Assistant turn.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new("assistant", content)
    }

    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Anything that can answer a chat conversation.
pub trait TextOracle {
    /// Produce the next assistant reply for `messages`.
    fn complete(&self, messages: &[ChatMessage]) -> impl Future<Output = Result<String>> + Send;
}

/// A conversation with running history.
///
/// Questions asked in one session see the earlier questions and answers.
#[derive(Debug)]
pub struct ChatSession<'a, O> {
    oracle: &'a O,
    history: Vec<ChatMessage>,
}

impl<'a, O: TextOracle + Sync> ChatSession<'a, O> {
    /// Start a session with a system prompt.
    #[must_use]
    pub fn new(oracle: &'a O, system_prompt: &str) -> Self {
        Self {
            oracle,
            history: vec![ChatMessage::system(system_prompt)],
        }
    }

    /// Ask a question and return the cleaned reply.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error; the question is then dropped from the history.
    pub async fn ask(&mut self, prompt: &str) -> Result<String> {
        self.history.push(ChatMessage::user(prompt));
        match self.oracle.complete(&self.history).await {
            Ok(reply) => {
                self.history.push(ChatMessage::assistant(&reply));
                Ok(clean_reply(&reply))
            }
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }

    /// Every turn so far, starting with the system prompt.
    #[must_use]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}

/// Drop `###` markers and the rest of their line, then trim.
///
/// Some models append `### Instruction`-style trailers to their answers.
#[must_use]
pub fn clean_reply(reply: &str) -> String {
    reply
        .lines()
        .map(|line| line.find("###").map_or(line, |at| &line[..at]))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Whether a yes/no answer says yes.
#[must_use]
pub fn is_affirmative(reply: &str) -> bool {
    reply.to_lowercase().contains("yes")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Client for an Ollama-compatible `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http_client: Client,
    chat_url: String,
    model: String,
}

impl OllamaClient {
    /// Create a client from the model and runtime settings.
    ///
    /// # Errors
    ///
    /// Returns an error if HTTP client creation fails.
    pub fn new(model: &ModelConfig, runtime: &RuntimeConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(runtime.request_timeout())
            .build()
            .map_err(|e| CoreError::Other(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            chat_url: format!("{}/api/chat", model.endpoint.trim_end_matches('/')),
            model: model.model.clone(),
        })
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TextOracle for OllamaClient {
    fn complete(&self, messages: &[ChatMessage]) -> impl Future<Output = Result<String>> + Send {
        let request = self.http_client.post(&self.chat_url).json(&ChatRequest {
            model: &self.model,
            messages,
            stream: false,
        });
        let url = self.chat_url.clone();

        async move {
            log::debug!("asking model at {url}");
            let response = request
                .send()
                .await
                .map_err(|e| CoreError::Model(format!("{url}: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CoreError::Model(format!("{url} returned HTTP {status}: {body}")));
            }

            let reply: ChatResponse = response
                .json()
                .await
                .map_err(|e| CoreError::Model(format!("{url}: invalid reply: {e}")))?;
            Ok(reply.message.content)
        }
    }
}
