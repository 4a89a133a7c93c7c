//! `path_intake`: the first stage in the build DAG. Ensures
//! the canonical Path row exists, then establishes the learning goal
//! ("charter") either from the job's `prompt` payload field or, when a chat
//! thread is attached and the job isn't running non-interactively, by asking
//! the user.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::path_repo::PathRepo;

use crate::chat::{ask_or_resume, Answer, ChatThread};
use crate::error::Result;

const QUESTION_KIND: &str = "path_intake_goal";

pub struct PathIntakeStage {
    paths: Arc<PathRepo>,
    chat: Option<Arc<dyn ChatThread>>,
}

impl PathIntakeStage {
    pub fn new(paths: Arc<PathRepo>, chat: Option<Arc<dyn ChatThread>>) -> Self {
        Self { paths, chat }
    }
}

#[async_trait]
impl Pipeline for PathIntakeStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::PATH_INTAKE
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        jc.progress(self.r#type(), 5, "ensuring path".to_string()).await?;

        let path_id = self.paths.ensure_path(jc.job.owner_user_id, material_set_id).await?;
        let path = self.paths.find(path_id).await?;

        if path.metadata.get("intake").is_some() && !jc.job.payload_bool(payload::FORCE) {
            jc.succeed(serde_json::json!({"path_id": path_id, "skipped": true})).await?;
            return Ok(());
        }

        let prompt = jc.payload_str(payload::PROMPT).unwrap_or("").trim().to_string();
        let thread_id = jc.payload_uuid_opt(payload::THREAD_ID)?;

        let goal = if !prompt.is_empty() {
            prompt
        } else if let (Some(chat), Some(thread_id)) = (self.chat.as_ref(), thread_id) {
            match ask_or_resume(
                chat.as_ref(),
                thread_id,
                jc.job.id,
                QUESTION_KIND,
                "What would you like to learn from these materials?",
                jc.non_interactive,
            )
            .await?
            {
                Answer::Ready(reply) => reply.content,
                Answer::Default => "general overview".to_string(),
                Answer::MustSuspend { question_id, question_seq } => {
                    jc.suspend(question_id, question_seq).await?;
                    return Ok(());
                }
            }
        } else {
            "general overview".to_string()
        };

        jc.progress(self.r#type(), 80, "recording charter".to_string()).await?;
        self.paths
            .merge_metadata(path_id, serde_json::json!({"intake": {"goal": goal}, "charter": {"goal": goal}}))
            .await?;

        jc.succeed(serde_json::json!({"path_id": path_id, "skipped": false})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // `PathRepo` requires a live Postgres pool; `ask_or_resume`'s branching
    // logic is covered directly in `crate::chat`'s unit tests.
}
