//! Interactive pause/resume support for `path_intake` and
//! `web_resources_seed`. The chat thread itself is an external
//! collaborator with a named interface only: this module only declares
//! the narrow surface a stage needs and the suspend-then-wait protocol
//! built on top of it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

impl ChatMessage {
    pub fn question_job_id(&self) -> Option<Uuid> {
        self.metadata.get("job_id").and_then(serde_json::Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn question_kind(&self) -> Option<&str> {
        self.metadata.get("kind").and_then(serde_json::Value::as_str)
    }
}

/// A thread a stage can post a question into and poll for the user's reply.
/// Implementations own whatever storage/transport backs the
/// thread; the orchestrator never sits on a channel waiting for a reply —
/// it suspends and is re-enqueued by an external resume trigger.
#[async_trait]
pub trait ChatThread: Send + Sync {
    async fn post(&self, thread_id: Uuid, role: &str, content: &str, metadata: serde_json::Value) -> Result<ChatMessage>;

    /// The most recent message in the thread matching `metadata.kind =
    /// question_kind` and `metadata.job_id = job_id`, if one has been posted.
    async fn latest_question(&self, thread_id: Uuid, question_kind: &str, job_id: Uuid) -> Result<Option<ChatMessage>>;

    /// The first `role=user` message with `seq` strictly greater than
    /// `after_seq`, if the user has replied yet.
    async fn first_user_reply_after(&self, thread_id: Uuid, after_seq: i64) -> Result<Option<ChatMessage>>;
}

/// Outcome of [`ask_or_resume`]: either the stage already has its answer (a
/// prior question was asked and answered, or the caller opted out of asking)
/// or it must suspend and wait.
pub enum Answer {
    Ready(ChatMessage),
    Default,
    MustSuspend { question_id: Uuid, question_seq: i64 },
}

/// Implements the idempotent ask-once protocol: if the question was never
/// asked, post it and report `MustSuspend`. If it was asked but not yet
/// answered, report `MustSuspend` again (the caller's `Suspend` call is a
/// no-op re-write of the same state). If answered, return the reply.
/// `non_interactive` short-circuits straight to `Answer::Default`: the
/// stage skips the pause and proceeds with defaults.
pub async fn ask_or_resume(
    chat: &dyn ChatThread,
    thread_id: Uuid,
    job_id: Uuid,
    question_kind: &str,
    question_text: &str,
    non_interactive: bool,
) -> Result<Answer> {
    if non_interactive {
        return Ok(Answer::Default);
    }

    let question = chat.latest_question(thread_id, question_kind, job_id).await?;
    let question = match question {
        Some(q) => q,
        None => {
            let metadata = serde_json::json!({"kind": question_kind, "job_id": job_id});
            let posted = chat.post(thread_id, "assistant", question_text, metadata).await?;
            return Ok(Answer::MustSuspend { question_id: posted.id, question_seq: posted.seq });
        }
    };

    match chat.first_user_reply_after(thread_id, question.seq).await? {
        Some(reply) => Ok(Answer::Ready(reply)),
        None => Ok(Answer::MustSuspend { question_id: question.id, question_seq: question.seq }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeThread {
        messages: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatThread for FakeThread {
        async fn post(&self, _thread_id: Uuid, role: &str, content: &str, metadata: serde_json::Value) -> Result<ChatMessage> {
            let mut messages = self.messages.lock().unwrap();
            let seq = messages.len() as i64;
            let msg = ChatMessage { id: Uuid::new_v4(), seq, role: role.to_string(), content: content.to_string(), metadata };
            messages.push(msg.clone());
            Ok(msg)
        }

        async fn latest_question(&self, _thread_id: Uuid, question_kind: &str, job_id: Uuid) -> Result<Option<ChatMessage>> {
            let messages = self.messages.lock().unwrap();
            Ok(messages
                .iter()
                .rev()
                .find(|m| m.question_kind() == Some(question_kind) && m.question_job_id() == Some(job_id))
                .cloned())
        }

        async fn first_user_reply_after(&self, _thread_id: Uuid, after_seq: i64) -> Result<Option<ChatMessage>> {
            let messages = self.messages.lock().unwrap();
            Ok(messages.iter().find(|m| m.role == "user" && m.seq > after_seq).cloned())
        }
    }

    #[tokio::test]
    async fn non_interactive_skips_straight_to_default() {
        let chat = FakeThread { messages: Mutex::new(vec![]) };
        let answer = ask_or_resume(&chat, Uuid::new_v4(), Uuid::new_v4(), "consent", "ok?", true).await.unwrap();
        assert!(matches!(answer, Answer::Default));
        assert!(chat.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_call_posts_question_and_suspends() {
        let chat = FakeThread { messages: Mutex::new(vec![]) };
        let job_id = Uuid::new_v4();
        let answer = ask_or_resume(&chat, Uuid::new_v4(), job_id, "consent", "ok?", false).await.unwrap();
        assert!(matches!(answer, Answer::MustSuspend { question_seq: 0, .. }));
        assert_eq!(chat.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resumes_with_ready_once_user_replies() {
        let chat = FakeThread { messages: Mutex::new(vec![]) };
        let job_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        ask_or_resume(&chat, thread_id, job_id, "consent", "ok?", false).await.unwrap();
        chat.post(thread_id, "user", "yes", serde_json::json!({})).await.unwrap();

        let answer = ask_or_resume(&chat, thread_id, job_id, "consent", "ok?", false).await.unwrap();
        match answer {
            Answer::Ready(reply) => assert_eq!(reply.content, "yes"),
            _ => panic!("expected Ready"),
        }
    }

    #[tokio::test]
    async fn re_asking_before_reply_suspends_again_without_reposting() {
        let chat = FakeThread { messages: Mutex::new(vec![]) };
        let job_id = Uuid::new_v4();
        let thread_id = Uuid::new_v4();
        ask_or_resume(&chat, thread_id, job_id, "consent", "ok?", false).await.unwrap();
        let answer = ask_or_resume(&chat, thread_id, job_id, "consent", "ok?", false).await.unwrap();
        assert!(matches!(answer, Answer::MustSuspend { question_seq: 0, .. }));
        assert_eq!(chat.messages.lock().unwrap().len(), 1);
    }
}
