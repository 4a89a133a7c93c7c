//! AI Call Wrapper: a single capability set covering
//! chat/json/embed/image/video, each returning a typed result whose
//! transient failures are retried in the client and whose non-transient
//! failures surface to the stage.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AiError, Result};
use crate::schema::CompiledSchema;

/// Bytes plus MIME type for a rendered asset.
#[derive(Debug, Clone)]
pub struct GeneratedAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct VideoOptions {
    pub duration_sec: Option<u32>,
    pub aspect_ratio: Option<String>,
}

/// The four orthogonal AI operations. Implementations wrap
/// a specific vendor SDK; the orchestrator never depends on vendor types
/// directly.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Sends a structured-output request and returns the raw parsed JSON
    /// (schema conformance is checked by the caller via [`CompiledSchema`],
    /// since the caller needs the raw violations to append as
    /// "VALIDATION_ERRORS_TO_FIX" feedback on the next retry attempt).
    async fn generate_json_raw(&self, system: &str, user: &str, schema_name: &str) -> Result<Value>;

    /// Batch-embeds `texts`, one vector per input, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedAsset>;

    async fn generate_video(&self, prompt: &str, opts: VideoOptions) -> Result<GeneratedAsset>;
}

/// `GenerateJSON(system, user, schemaName, schema)`: calls the vendor, then
/// validates the parsed object against `schema`. A schema-compile/provider
/// rejection surfaces as [`AiError::SchemaRejected`] and is NOT retried by
/// this wrapper — the generate-validate-retry loop in the calling stage
/// decides whether to re-prompt with feedback.
pub async fn generate_json(
    client: &dyn AiClient,
    system: &str,
    user: &str,
    schema: &CompiledSchema,
) -> Result<Value> {
    let value = client.generate_json_raw(system, user, schema.name()).await?;
    match schema.validate(&value) {
        Ok(()) => Ok(value),
        Err(violations) => Err(AiError::SchemaRejected(violations.join("; "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyClient {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
        response: Value,
    }

    #[async_trait]
    impl AiClient for FlakyClient {
        async fn generate_json_raw(&self, _s: &str, _u: &str, _name: &str) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(AiError::Transient("vendor 503".into()))
            } else {
                Ok(self.response.clone())
            }
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
        }
        async fn generate_image(&self, _p: &str) -> Result<GeneratedAsset> {
            Ok(GeneratedAsset { bytes: vec![1, 2, 3], mime_type: "image/png".into() })
        }
        async fn generate_video(&self, _p: &str, _o: VideoOptions) -> Result<GeneratedAsset> {
            Ok(GeneratedAsset { bytes: vec![1, 2, 3], mime_type: "video/mp4".into() })
        }
    }

    #[tokio::test]
    async fn generate_json_validates_response_against_schema() {
        let schema = CompiledSchema::compile(
            "doc.v1",
            &json!({"type": "object", "required": ["title"], "properties": {"title": {"type": "string"}}}),
        )
        .unwrap();
        let client = FlakyClient { calls: Arc::new(AtomicU32::new(0)), fail_first_n: 0, response: json!({"title": "x"}) };
        let result = generate_json(&client, "sys", "usr", &schema).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn generate_json_surfaces_schema_violation_without_retry() {
        let schema = CompiledSchema::compile(
            "doc.v1",
            &json!({"type": "object", "required": ["title"], "properties": {"title": {"type": "string"}}}),
        )
        .unwrap();
        let client = FlakyClient { calls: Arc::new(AtomicU32::new(0)), fail_first_n: 0, response: json!({}) };
        let result = generate_json(&client, "sys", "usr", &schema).await;
        assert!(matches!(result, Err(AiError::SchemaRejected(_))));
    }
}
