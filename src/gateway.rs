//! The trait boundary between the orchestrator and an LLM backend, plus a
//! reference implementation speaking Ollama's HTTP API.
//!
//! Grounded on `ai/ollama_client.py`'s `OllamaClient` (health check via
//! `GET /api/tags`, generation via `POST /api/generate`, streaming-NDJSON
//! vs single-JSON response handling), ported from `httpx.AsyncClient` to a
//! blocking `reqwest::blocking::Client` since this crate's concurrency
//! model is threads and channels rather than an async runtime.

use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Per-request generation knobs, layered over the gateway's defaults.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// A generated response, with response time measured by the caller.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub content: String,
    pub response_time: Duration,
}

/// The boundary the orchestrator talks to. Implementations own their own
/// connection pooling and timeouts; all methods are blocking and intended
/// to run on a worker thread, never on the scheduling thread.
pub trait ModelGateway: Send + Sync {
    fn health(&self) -> bool;
    fn list_models(&self) -> Result<Vec<String>, GatewayError>;
    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<ModelResponse, GatewayError>;
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f64,
    top_p: f64,
}

#[derive(Deserialize)]
struct OllamaGenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelEntry>,
}

#[derive(Deserialize)]
struct OllamaModelEntry {
    name: String,
}

/// Talks to a local (or remote) Ollama server over its HTTP API.
pub struct OllamaGateway {
    host: String,
    default_model: String,
    client: reqwest::blocking::Client,
}

impl OllamaGateway {
    pub fn new(host: impl Into<String>, default_model: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            client,
        }
    }

    fn tags(&self) -> Result<OllamaTagsResponse, GatewayError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        response
            .json::<OllamaTagsResponse>()
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

impl ModelGateway for OllamaGateway {
    fn health(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        self.client
            .get(&url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        Ok(self.tags()?.models.into_iter().map(|m| m.name).collect())
    }

    fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<ModelResponse, GatewayError> {
        let model = options.model.as_deref().unwrap_or(&self.default_model);
        let body = OllamaRequest {
            model,
            prompt,
            stream: true,
            options: OllamaOptions {
                num_predict: options.max_tokens,
                temperature: options.temperature,
                top_p: 0.9,
            },
        };

        let url = format!("{}/api/generate", self.host);
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(started.elapsed())
                } else {
                    GatewayError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Request(format!(
                "ollama returned status {}",
                response.status()
            )));
        }

        let mut content = String::new();
        let reader = BufReader::new(response);
        for line in reader.lines() {
            let line = line.map_err(|e| GatewayError::Request(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<OllamaGenerateChunk>(&line) else {
                continue;
            };
            content.push_str(&chunk.response);
            if chunk.done {
                break;
            }
        }

        Ok(ModelResponse {
            content,
            response_time: started.elapsed(),
        })
    }
}
