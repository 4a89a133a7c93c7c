//! AI Call Wrapper: `generate_json`/`embed`/
//! `generate_image`/`generate_video`, retrying transient vendor failures
//! with backoff and surfacing schema-shape rejections immediately.

pub mod client;
pub mod error;
pub mod http_client;
pub mod mock;
pub mod retry;
pub mod schema;

pub use client::{generate_json, AiClient, GeneratedAsset, VideoOptions};
pub use error::{AiError, Result};
pub use http_client::{HttpAiClient, HttpAiClientConfig};
pub use retry::{with_retry, BackoffPolicy};
pub use schema::CompiledSchema;

#[cfg(feature = "test-support")]
pub use mock::MockAiClient;
