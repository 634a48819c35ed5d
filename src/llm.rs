//! Ollama chat client shared by the supervisor and the workers.
//!
//! Thin wrapper over the `/api/chat` endpoint: plain completions for
//! routing decisions, tool-calling completions for worker reasoning.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Configuration for the chat client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Transport retries per request.
    pub retries: usize,
    /// Show a spinner while a request is in flight.
    pub show_progress: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
            retries: 3,
            show_progress: false,
        }
    }
}

/// Message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCallMessage>>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: Value,
}

/// Tool definition for the Ollama tool-calling API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Chat API request.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Chat API response.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

/// Assistant turn returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
}

/// The chat client.
pub struct LlmClient {
    config: LlmConfig,
    http_client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
        }
    }

    /// Plain completion: returns the assistant's text.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, Vec::new()).await?;
        Ok(response.content)
    }

    /// Tool-calling completion: returns the full assistant turn.
    pub async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ResponseMessage> {
        let tools_json: Vec<Value> = tools
            .iter()
            .map(|tool| serde_json::to_value(tool).context("Failed to encode tool definition"))
            .collect::<Result<_>>()?;
        self.send(messages, tools_json).await
    }

    async fn send(&self, messages: &[ChatMessage], tools: Vec<Value>) -> Result<ResponseMessage> {
        let url = format!("{}/api/chat", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            tools,
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        debug!(
            "Sending chat request with {} messages to {}",
            messages.len(),
            url
        );

        let spinner = self.spinner();
        let mut last_error = None;

        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                warn!("Retrying chat request (attempt {})", attempt + 1);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }

            match self.http_client.post(&url).json(&request).send().await {
                Ok(response) => {
                    if let Some(spinner) = &spinner {
                        spinner.finish_and_clear();
                    }
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
                    }
                    let chat_response: ChatResponse = response
                        .json()
                        .await
                        .context("Failed to parse Ollama response")?;
                    return Ok(chat_response.message);
                }
                Err(e) => {
                    last_error = Some(self.describe_transport_error(e));
                }
            }
        }

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Chat request failed")))
    }

    fn describe_transport_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow::anyhow!(
                "Request timed out after {}s. Try a smaller model or a longer --timeout.",
                self.config.timeout_seconds
            )
        } else if e.is_connect() {
            anyhow::anyhow!(
                "Cannot connect to Ollama at {}. Is Ollama running?",
                self.config.base_url
            )
        } else {
            anyhow::anyhow!("Failed to send request: {}", e)
        }
    }

    fn spinner(&self) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} waiting for {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(self.config.model.clone());
        spinner.enable_steady_tick(Duration::from_millis(120));
        Some(spinner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "llama3.2:latest");
        assert_eq!(config.retries, 3);
        assert!(!config.show_progress);
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::system("policy").role, "system");
        assert_eq!(ChatMessage::user("hello").role, "user");
        assert_eq!(ChatMessage::tool("output").role, "tool");

        let turn = ChatMessage::assistant("Clustering", None);
        assert_eq!(turn.role, "assistant");
        assert!(turn.tool_calls.is_none());
    }

    #[test]
    fn test_request_serialization_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            tools: Vec::new(),
            stream: false,
            options: ChatOptions { temperature: 0.1 },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("\"tools\""));
        assert!(json.contains("\"stream\":false"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_connection_error() {
        let client = LlmClient::new(LlmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_seconds: 2,
            retries: 0,
            ..LlmConfig::default()
        });

        let err = client
            .complete(&[ChatMessage::user("hello")])
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(
            text.contains("Cannot connect") || text.contains("timed out") || text.contains("Failed to send"),
            "unexpected error: {text}"
        );
    }
}
