use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BotIdentity, GenerationConfig};

/// Continues a tagged prompt with the bot's fine-tuned model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the prompt followed by the generated continuation.
    async fn generate(&self, bot: &BotIdentity, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    repetition_penalty: f32,
    stop: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

/// Client for an OpenAI-compatible `/completions` endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn request<'a>(&'a self, model: &'a str, prompt: &'a str) -> CompletionRequest<'a> {
        CompletionRequest {
            model,
            prompt,
            max_tokens: self.config.max_length,
            temperature: self.config.temperature,
            top_k: self.config.top_k,
            top_p: self.config.top_p,
            repetition_penalty: self.config.repetition_penalty,
            stop: vec![self.config.stop_token.as_str()],
        }
    }
}

#[async_trait]
impl TextGenerator for CompletionClient {
    async fn generate(&self, bot: &BotIdentity, prompt: &str) -> Result<String> {
        let url = format!("{}/completions", self.config.api_url.trim_end_matches('/'));
        let request = self.request(&bot.model, prompt);

        let mut req = self.client.post(&url).json(&request);

        // Local servers run without a key
        if let Some(key) = self.config.api_key.as_deref().filter(|key| !key.is_empty()) {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        tracing::info!(":: Starting text generation for {} with {}", bot.name, bot.model);
        let response = req
            .send()
            .await
            .context("Failed to send generation request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Generation API returned error {}: {}", status, body);
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        let continuation = continuation_text(completion)?;
        Ok(format!("{}{}", prompt, continuation))
    }
}

fn continuation_text(completion: CompletionResponse) -> Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.text)
        .ok_or_else(|| anyhow::anyhow!("No completion returned"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_sampling_parameters() {
        let client = CompletionClient::new(GenerationConfig::default());
        let value = serde_json::to_value(client.request("gpt2-news", "<|sor|>"))
            .expect("serialize request");

        assert_eq!(value["model"], "gpt2-news");
        assert_eq!(value["prompt"], "<|sor|>");
        assert_eq!(value["max_tokens"], 1024);
        assert_eq!(value["top_k"], 50);
        assert_eq!(value["stop"][0], "<|endoftext|>");
    }

    #[test]
    fn takes_the_first_choice() {
        let completion: CompletionResponse =
            serde_json::from_str(r#"{"choices":[{"text":"hello<|eor|>"},{"text":"other"}]}"#)
                .expect("parse response");
        assert_eq!(continuation_text(completion).expect("choice"), "hello<|eor|>");

        let empty: CompletionResponse =
            serde_json::from_str(r#"{"choices":[]}"#).expect("parse response");
        assert!(continuation_text(empty).is_err());
    }
}
