//! Model backend adapter.
//!
//! An OpenAI-style chat-completions client implementing [`ModelPort`].
//! Each call spawns a task; the outcome is delivered back into the event
//! queue as a [`HostEvent::ModelResult`], never returned to the caller.
//! Orchestration timeouts stay with the reaper — the HTTP timeout here only
//! bounds how long a doomed connection can hold a socket.

use crate::config::LlmConfig;
use crate::error::Result;
use crate::ports::{ChatMessage, ModelOptions, ModelPort};
use crate::{HostEvent, RequestId};

use anyhow::Context as _;
use serde::Deserialize;
use tokio::sync::mpsc;

/// Chat-completions client for the configured backend.
pub struct HttpModelClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    events: mpsc::Sender<HostEvent>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

impl HttpModelClient {
    pub fn new(config: &LlmConfig, events: mpsc::Sender<HostEvent>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            events,
        })
    }

    async fn execute(
        http: reqwest::Client,
        base_url: String,
        api_key: String,
        body: serde_json::Value,
    ) -> Result<String> {
        let response = http
            .post(&base_url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .context("model request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(crate::ParleyError::Model(format!(
                "backend returned {status}"
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("malformed completion response")?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

impl ModelPort for HttpModelClient {
    fn call_model(&self, request_id: RequestId, messages: &[ChatMessage], options: &ModelOptions) {
        let mut body = serde_json::json!({
            "model": options.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
        });
        if options.enable_search {
            body["enable_search"] = serde_json::Value::Bool(true);
        }

        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let events = self.events.clone();
        let model = options.model.clone();

        tokio::spawn(async move {
            let (success, content) =
                match Self::execute(http, base_url, api_key, body).await {
                    Ok(content) => (true, content),
                    Err(error) => {
                        tracing::warn!(%error, %model, request_id = %request_id, "model call failed");
                        (false, String::new())
                    }
                };
            if events
                .send(HostEvent::ModelResult {
                    request_id,
                    success,
                    content,
                })
                .await
                .is_err()
            {
                tracing::debug!(request_id = %request_id, "event queue closed, result dropped");
            }
        });
    }
}
