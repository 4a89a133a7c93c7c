//! Process-wide configuration, read once at startup. Avoids scattering raw
//! env-var reads through hot paths: read once, cache in a struct, pass
//! explicitly.

use std::env;
use std::time::Duration;

/// All env-configurable tunables, with defaults chosen for a single-worker
/// development run. Exact retry caps and backoff constants vary by stage
/// and are intentionally left env-driven rather than fixed in code.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub embed_chunks_batch_size: usize,
    pub embed_chunks_concurrency: usize,
    pub node_doc_build_concurrency: usize,
    pub node_doc_must_cite_per_node: usize,
    pub node_doc_diagrams_limit: i64,
    pub concept_graph_max_chunks: usize,
    pub web_resources_enabled: bool,
    pub web_resources_require_consent: bool,
    pub web_resources_max_fetch: usize,
    pub web_resources_max_bytes: u64,
    pub saga_cleanup_older_hours: i64,
    pub saga_cleanup_limit: i64,
    pub openai_image_model: Option<String>,
    pub openai_video_model: Option<String>,
    pub default_lease: Duration,
    pub default_max_attempts: i32,
}

impl OrchestratorConfig {
    /// Read every tunable from the process environment exactly once.
    pub fn from_env() -> Self {
        Self {
            embed_chunks_batch_size: env_usize("EMBED_CHUNKS_BATCH_SIZE", 64),
            embed_chunks_concurrency: env_usize("EMBED_CHUNKS_CONCURRENCY", 4),
            node_doc_build_concurrency: env_usize("NODE_DOC_BUILD_CONCURRENCY", num_cpus::get().max(2)),
            node_doc_must_cite_per_node: env_usize("NODE_DOC_MUST_CITE_PER_NODE", 6),
            node_doc_diagrams_limit: env_i64("NODE_DOC_DIAGRAMS_LIMIT", 2),
            concept_graph_max_chunks: env_usize("CONCEPT_GRAPH_MAX_CHUNKS", 200),
            web_resources_enabled: env_bool("WEB_RESOURCES_ENABLED", true),
            web_resources_require_consent: env_bool("WEB_RESOURCES_REQUIRE_CONSENT", true),
            web_resources_max_fetch: env_usize("WEB_RESOURCES_MAX_FETCH", 5),
            web_resources_max_bytes: env_u64("WEB_RESOURCES_MAX_BYTES", 5 * 1024 * 1024),
            saga_cleanup_older_hours: env_i64("SAGA_CLEANUP_OLDER_HOURS", 24),
            saga_cleanup_limit: env_i64("SAGA_CLEANUP_LIMIT", 100),
            openai_image_model: env::var("OPENAI_IMAGE_MODEL").ok(),
            openai_video_model: env::var("OPENAI_VIDEO_MODEL").ok(),
            default_lease: Duration::from_secs(90),
            default_max_attempts: 3,
        }
    }

    /// A config instance with every default, for tests.
    pub fn for_tests() -> Self {
        // SAFETY-equivalent: reading the real environment would make tests
        // order-dependent. Build directly instead of via `from_env`.
        Self {
            embed_chunks_batch_size: 8,
            embed_chunks_concurrency: 2,
            node_doc_build_concurrency: 2,
            node_doc_must_cite_per_node: 3,
            node_doc_diagrams_limit: 2,
            concept_graph_max_chunks: 50,
            web_resources_enabled: true,
            web_resources_require_consent: true,
            web_resources_max_fetch: 5,
            web_resources_max_bytes: 1024 * 1024,
            saga_cleanup_older_hours: 24,
            saga_cleanup_limit: 100,
            openai_image_model: None,
            openai_video_model: None,
            default_lease: Duration::from_secs(30),
            default_max_attempts: 3,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagrams_limit_zero_disables_and_negative_means_unlimited() {
        env::set_var("NODE_DOC_DIAGRAMS_LIMIT", "0");
        assert_eq!(OrchestratorConfig::from_env().node_doc_diagrams_limit, 0);
        env::set_var("NODE_DOC_DIAGRAMS_LIMIT", "-1");
        assert_eq!(OrchestratorConfig::from_env().node_doc_diagrams_limit, -1);
        env::remove_var("NODE_DOC_DIAGRAMS_LIMIT");
    }

    #[test]
    fn bool_env_accepts_common_truthy_spellings() {
        env::set_var("WEB_RESOURCES_ENABLED", "false");
        assert!(!OrchestratorConfig::from_env().web_resources_enabled);
        env::remove_var("WEB_RESOURCES_ENABLED");
    }
}
