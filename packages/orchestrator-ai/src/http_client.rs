//! Default `AiClient` wired over HTTP. Talks to any OpenAI-API-compatible
//! vendor endpoint — the specific vendor is still a named-interface
//! collaborator; swapping vendors means swapping the base URL and model
//! names in config, not this module.
//!
//! Retries of transient failures are the caller's job via
//! [`crate::retry::with_retry`] wrapping the four trait methods; this client
//! only classifies a response as [`AiError::Transient`] vs.
//! [`AiError::SchemaRejected`] vs fatal.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::client::{AiClient, GeneratedAsset, VideoOptions};
use crate::error::{AiError, Result};
use crate::retry::{with_retry, BackoffPolicy};

/// Endpoints and model names for one vendor deployment. Populated from
/// `OPENAI_IMAGE_MODEL`/`OPENAI_VIDEO_MODEL` plus a base URL and API key the
/// worker binary reads once at startup.
#[derive(Debug, Clone)]
pub struct HttpAiClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embed_model: String,
    pub image_model: Option<String>,
    pub video_model: Option<String>,
    pub backoff: BackoffPolicy,
}

pub struct HttpAiClient {
    http: Client,
    config: HttpAiClientConfig,
}

impl HttpAiClient {
    pub fn new(config: HttpAiClientConfig) -> Self {
        Self { http: Client::new(), config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn classify_response_error(resp: reqwest::Response) -> AiError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
            AiError::SchemaRejected(format!("vendor rejected request ({status}): {body}"))
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            AiError::Transient(format!("vendor error ({status}): {body}"))
        } else {
            AiError::Other(anyhow::anyhow!("vendor error ({status}): {body}"))
        }
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let result = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(AiError::Timeout),
            Err(e) => return Err(AiError::Transient(e.to_string())),
        };

        if !resp.status().is_success() {
            return Err(Self::classify_response_error(resp).await);
        }

        resp.json::<Value>().await.map_err(|e| AiError::Transient(format!("invalid vendor JSON body: {e}")))
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn generate_json_raw(&self, system: &str, user: &str, schema_name: &str) -> Result<Value> {
        with_retry(self.config.backoff, || async {
            let body = json!({
                "model": self.config.chat_model,
                "response_format": {"type": "json_object"},
                "messages": [
                    {"role": "system", "content": format!("{system}\n\nRespond only with JSON matching schema `{schema_name}`.")},
                    {"role": "user", "content": user},
                ],
            });
            let value = self.post_json("v1/chat/completions", body).await?;
            let content = value
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .ok_or_else(|| AiError::SchemaRejected("vendor response missing choices[0].message.content".into()))?;
            serde_json::from_str(content).map_err(|e| AiError::SchemaRejected(format!("generator output was not valid JSON: {e}")))
        })
        .await
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        with_retry(self.config.backoff, || async {
            let body = json!({"model": self.config.embed_model, "input": texts});
            let value = self.post_json("v1/embeddings", body).await?;
            let data = value
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| AiError::SchemaRejected("vendor embeddings response missing `data`".into()))?;
            data.iter()
                .map(|item| {
                    item.get("embedding")
                        .and_then(Value::as_array)
                        .map(|arr| arr.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
                        .ok_or_else(|| AiError::SchemaRejected("embedding item missing `embedding` array".into()))
                })
                .collect()
        })
        .await
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedAsset> {
        let model = self.config.image_model.clone().ok_or_else(|| AiError::Other(anyhow::anyhow!("OPENAI_IMAGE_MODEL not configured")))?;
        with_retry(self.config.backoff, || async {
            let body = json!({"model": model, "prompt": prompt, "response_format": "b64_json"});
            let value = self.post_json("v1/images/generations", body).await?;
            let b64 = value
                .get("data")
                .and_then(|d| d.get(0))
                .and_then(|d| d.get("b64_json"))
                .and_then(Value::as_str)
                .ok_or_else(|| AiError::SchemaRejected("image response missing data[0].b64_json".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| AiError::SchemaRejected(format!("invalid base64 image payload: {e}")))?;
            Ok(GeneratedAsset { bytes, mime_type: "image/png".to_string() })
        })
        .await
    }

    async fn generate_video(&self, prompt: &str, opts: VideoOptions) -> Result<GeneratedAsset> {
        let model = self.config.video_model.clone().ok_or_else(|| AiError::Other(anyhow::anyhow!("OPENAI_VIDEO_MODEL not configured")))?;
        with_retry(self.config.backoff, || async {
            let body = json!({
                "model": model,
                "prompt": prompt,
                "duration_seconds": opts.duration_sec,
                "aspect_ratio": opts.aspect_ratio,
                "response_format": "b64_json",
            });
            let value = self.post_json("v1/videos/generations", body).await?;
            let b64 = value
                .get("data")
                .and_then(|d| d.get(0))
                .and_then(|d| d.get("b64_json"))
                .and_then(Value::as_str)
                .ok_or_else(|| AiError::SchemaRejected("video response missing data[0].b64_json".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| AiError::SchemaRejected(format!("invalid base64 video payload: {e}")))?;
            Ok(GeneratedAsset { bytes, mime_type: "video/mp4".to_string() })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_engine_decodes_a_known_value() {
        assert_eq!(base64::engine::general_purpose::STANDARD.decode("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn url_joins_base_and_path_without_double_slashes() {
        let client = HttpAiClient::new(HttpAiClientConfig {
            base_url: "https://api.example.test/".to_string(),
            api_key: "k".to_string(),
            chat_model: "m".to_string(),
            embed_model: "m".to_string(),
            image_model: None,
            video_model: None,
            backoff: BackoffPolicy::default(),
        });
        assert_eq!(client.url("/v1/chat/completions"), "https://api.example.test/v1/chat/completions");
    }
}
