//! `web_resources_seed`: the consent-gated external-fetch stage. Honors a
//! persisted `path.metadata.web_resources_consent`, asks for
//! consent interactively when none exists and a thread is attached, defaults
//! to deny otherwise, and — when allowed — fetches a small number of
//! resources derived from the job's `prompt` and stores them as
//! `web_`-prefixed material files.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::path_repo::PathRepo;
use serde_json::json;

use crate::chat::{ask_or_resume, Answer, ChatThread};
use crate::error::Result;
use crate::web_fetch;

const QUESTION_KIND: &str = "web_resources_consent";
const SEED_FILE_NAME: &str = "web_learning_goal.txt";

pub struct WebResourcesSeedStage {
    paths: Arc<PathRepo>,
    materials: Arc<MaterialRepo>,
    chat: Option<Arc<dyn ChatThread>>,
    config: Arc<OrchestratorConfig>,
}

impl WebResourcesSeedStage {
    pub fn new(paths: Arc<PathRepo>, materials: Arc<MaterialRepo>, chat: Option<Arc<dyn ChatThread>>, config: Arc<OrchestratorConfig>) -> Self {
        Self { paths, materials, chat, config }
    }
}

#[async_trait]
impl Pipeline for WebResourcesSeedStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::WEB_RESOURCES_SEED
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let path = self.paths.find(path_id).await?;

        if !self.config.web_resources_enabled {
            self.paths
                .merge_metadata(path_id, json!({"web_resources_consent": {"allowed": false, "source": "disabled"}}))
                .await?;
            jc.succeed(json!({"fetched": 0, "allowed": false})).await?;
            return Ok(());
        }

        // 1. Honor existing consent.
        if let Some(consent) = path.metadata.get("web_resources_consent") {
            let allowed = consent.get("allowed").and_then(serde_json::Value::as_bool).unwrap_or(false);
            return self.finish(jc, material_set_id, jc.payload_str(payload::PROMPT).unwrap_or(""), allowed).await;
        }

        if !self.config.web_resources_require_consent {
            self.paths.merge_metadata(path_id, json!({"web_resources_consent": {"allowed": true, "source": "consent_not_required"}})).await?;
            return self.finish(jc, material_set_id, jc.payload_str(payload::PROMPT).unwrap_or(""), true).await;
        }

        let thread_id = jc.payload_uuid_opt(payload::THREAD_ID)?;
        match (self.chat.as_ref(), thread_id) {
            (Some(chat), Some(thread_id)) if !jc.non_interactive => {
                match ask_or_resume(
                    chat.as_ref(),
                    thread_id,
                    jc.job.id,
                    QUESTION_KIND,
                    "May I fetch a few public web pages to enrich these materials?",
                    jc.non_interactive,
                )
                .await?
                {
                    Answer::Ready(reply) => {
                        let allowed = reply.content.trim().to_ascii_lowercase().starts_with('y');
                        self.paths.merge_metadata(path_id, json!({"web_resources_consent": {"allowed": allowed, "source": "user_reply"}})).await?;
                        self.finish(jc, material_set_id, jc.payload_str(payload::PROMPT).unwrap_or(""), allowed).await
                    }
                    Answer::Default => {
                        self.paths.merge_metadata(path_id, json!({"web_resources_consent": {"allowed": false, "source": "no_thread_or_chat_deps"}})).await?;
                        self.finish(jc, material_set_id, jc.payload_str(payload::PROMPT).unwrap_or(""), false).await
                    }
                    Answer::MustSuspend { question_id, question_seq } => {
                        jc.suspend(question_id, question_seq).await?;
                        Ok(())
                    }
                }
            }
            _ => {
                // No thread or chat collaborator available: default-deny
                // and persist why.
                self.paths
                    .merge_metadata(path_id, json!({"web_resources_consent": {"allowed": false, "source": "no_thread_or_chat_deps"}}))
                    .await?;
                self.finish(jc, material_set_id, jc.payload_str(payload::PROMPT).unwrap_or(""), false).await
            }
        }
    }
}

impl WebResourcesSeedStage {
    async fn finish(&self, jc: &mut JobCtx, material_set_id: uuid::Uuid, prompt: &str, allowed: bool) -> Result<()> {
        if !allowed {
            self.ensure_local_goal_seed(material_set_id, prompt).await?;
            jc.succeed(json!({"fetched": 0, "allowed": false})).await?;
            return Ok(());
        }

        jc.progress(self.r#type(), 30, "fetching seed resources".to_string()).await?;
        let candidate_urls = derive_candidate_urls(prompt, self.config.web_resources_max_fetch);

        let mut fetched = 0usize;
        for url in candidate_urls {
            match web_fetch::fetch(&url, self.config.web_resources_max_bytes, &["text/html", "text/plain"]).await {
                Ok(resource) => {
                    let name = format!("web_{}", hash_short(&resource.final_url));
                    let key = orchestrator_core::payload::material_object_key(&material_set_id, &uuid::Uuid::new_v4());
                    self.materials
                        .upsert_file(material_set_id, &name, &key, Some(resource.content_type.as_str()), Some(resource.bytes.len() as i64))
                        .await?;
                    fetched += 1;
                }
                Err(e) => {
                    tracing::warn!(url, error = %e, "web_resources_seed: rejected or failed fetch, skipping");
                }
            }
        }

        jc.succeed(json!({"fetched": fetched, "allowed": true})).await?;
        Ok(())
    }

    /// When enrichment is denied or disabled, seed a local placeholder file
    /// from the prompt text so downstream ingestion still has at least one
    /// extractable source: the pipeline continues with only the
    /// `learning_goal.txt` seed file.
    async fn ensure_local_goal_seed(&self, material_set_id: uuid::Uuid, prompt: &str) -> Result<()> {
        let key = format!("materials/{material_set_id}/{SEED_FILE_NAME}");
        self.materials
            .upsert_file(material_set_id, SEED_FILE_NAME, &key, Some("text/plain"), Some(prompt.len() as i64))
            .await?;
        Ok(())
    }
}

fn hash_short(input: &str) -> String {
    orchestrator_core::fingerprint::hash_bytes(input.as_bytes())[..12].to_string()
}

/// Turns a free-text prompt into a small, bounded set of search-style URLs.
/// No search API is named in scope, so this derives deterministic
/// `https://en.wikipedia.org/wiki/<Topic>` lookups from capitalized noun
/// phrases in the prompt — good enough seed candidates, capped at
/// `max_fetch`.
fn derive_candidate_urls(prompt: &str, max_fetch: usize) -> Vec<String> {
    let mut topics: Vec<String> = prompt
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    topics.sort();
    topics.dedup();
    topics
        .into_iter()
        .take(max_fetch)
        .map(|topic| format!("https://en.wikipedia.org/wiki/{topic}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_candidate_urls_caps_and_titlecases() {
        let urls = derive_candidate_urls("learn about photosynthesis and chlorophyll", 1);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("https://en.wikipedia.org/wiki/"));
    }

    #[test]
    fn derive_candidate_urls_empty_prompt_yields_nothing() {
        assert!(derive_candidate_urls("", 5).is_empty());
    }
}
