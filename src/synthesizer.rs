//! Answer synthesis against an Ollama backend.
//!
//! [`OllamaClient`] wraps the native Ollama HTTP API: `/api/chat` for
//! generation, `/api/tags` + `/api/pull` for model provisioning at startup.
//! [`Synthesizer`] runs the compact-and-refine loop: answer from the best
//! chunk, then offer each remaining chunk as new context and let the model
//! keep or refine its answer.

use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DocentConfig;
use crate::error::GenerationError;
use crate::retriever::ScoredChunk;

/// Sampling options forwarded to the backend unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_ctx: u32,
    pub num_predict: u32,
    pub repeat_penalty: f32,
}

/// Thin client for the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    options: GenerationOptions,
}

impl OllamaClient {
    pub fn new(config: &DocentConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.backend_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            options: GenerationOptions {
                temperature: config.temperature,
                num_ctx: config.context_window,
                num_predict: config.max_output_tokens,
                repeat_penalty: config.repeat_penalty,
            },
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One non-streaming chat completion.
    pub async fn chat(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "stream": false,
            "options": self.options,
        });

        let response: Value = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .pointer("/message/content")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| {
                GenerationError::Malformed(format!("missing message content: {response}"))
            })
    }

    /// Verify the configured model is present, pulling it if necessary.
    pub async fn ensure_model(&self) -> Result<(), GenerationError> {
        let tags: Value = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let available = tags
            .pointer("/models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.pointer("/name").and_then(Value::as_str))
                    .any(|name| name == self.model)
            })
            .unwrap_or(false);
        if available {
            debug!(model = %self.model, "model already present");
            return Ok(());
        }

        info!(model = %self.model, "model not found, pulling");
        let pull: Value = self
            .http
            .post(format!("{}/api/pull", self.base_url))
            .json(&json!({"name": self.model, "stream": false}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let status = pull.pointer("/status").and_then(Value::as_str);
        if status == Some("success") {
            Ok(())
        } else {
            Err(GenerationError::ModelUnavailable {
                model: self.model.clone(),
                reason: format!("pull ended with status {status:?}"),
            })
        }
    }
}

fn qa_prompt(query: &str, context: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the question. \
         If the answer is not in the context, say 'I don't have enough information \
         to answer this question.'\n\
         Question: {query}\n\
         Answer: "
    )
}

fn refine_prompt(query: &str, existing: &str, context: &str) -> String {
    format!(
        "The original question is as follows: {query}\n\
         We have provided an existing answer: {existing}\n\
         We have the opportunity to refine the existing answer (only if needed) \
         with some more context below.\n\
         ------------\n\
         {context}\n\
         ------------\n\
         Given the new context, refine the original answer to better answer the \
         question. If the context isn't useful, return the existing answer."
    )
}

/// Compact-and-refine answer synthesis.
pub struct Synthesizer {
    client: OllamaClient,
    system_prompt: String,
}

impl Synthesizer {
    pub fn new(client: OllamaClient, system_prompt: String) -> Self {
        Self {
            client,
            system_prompt,
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Answer `query` from the retrieved chunks, best chunk first. With no
    /// chunks at all the model is asked against an empty context, which the
    /// QA prompt instructs it to decline.
    pub async fn synthesize(
        &self,
        query: &str,
        chunks: &[ScoredChunk],
    ) -> Result<String, GenerationError> {
        let mut contexts = chunks.iter().map(|c| c.chunk.text.as_str());
        let first = contexts.next().unwrap_or("");

        let mut answer = self
            .client
            .chat(&self.system_prompt, &qa_prompt(query, first))
            .await?;

        for context in contexts {
            answer = self
                .client
                .chat(
                    &self.system_prompt,
                    &refine_prompt(query, &answer, context),
                )
                .await?;
        }
        Ok(answer)
    }
}
