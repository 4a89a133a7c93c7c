//! Notifier Bridge: a best-effort, non-blocking pub/sub hub
//! keyed by `user:<id>` and `job:<id>` channels. It is NOT the source of
//! truth for job state — clients reconcile with a status read; a dropped
//! message here costs nothing but a slightly stale UI.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default per-channel buffer: once a lagging subscriber falls this many
/// messages behind, `broadcast` drops its oldest backlog rather than
/// blocking the publisher.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "job.created")]
    JobCreated,
    #[serde(rename = "job.progress")]
    JobProgress,
    #[serde(rename = "job.done")]
    JobDone,
    #[serde(rename = "job.failed")]
    JobFailed,
    #[serde(rename = "chat.message")]
    ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub channel: String,
    pub event: Event,
    pub data: serde_json::Value,
}

pub fn user_channel(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn job_channel(job_id: Uuid) -> String {
    format!("job:{job_id}")
}

/// The pub/sub hub itself. Channels are created lazily on first publish or
/// subscribe and live for the process's lifetime — the channel-name space
/// (`user:<id>`, `job:<id>`) is small relative to a single worker process's
/// memory budget, so nothing ever evicts a `broadcast::Sender`.
pub struct Notifier {
    channels: Mutex<HashMap<String, broadcast::Sender<NotifyMessage>>>,
    capacity: usize,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        Self { channels: Mutex::new(HashMap::new()), capacity }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<NotifyMessage> {
        let mut channels = self.channels.lock().unwrap();
        channels.entry(channel.to_string()).or_insert_with(|| broadcast::channel(self.capacity).0).clone()
    }

    /// Subscribe to one channel (`user:<id>` or `job:<id>`).
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<NotifyMessage> {
        self.sender_for(channel).subscribe()
    }

    /// Publish `event`/`data` to `channel`. Best-effort: a channel with no
    /// subscribers yields a harmless `SendError` that's dropped here.
    pub fn publish(&self, channel: &str, event: Event, data: serde_json::Value) {
        let sender = self.sender_for(channel);
        let _ = sender.send(NotifyMessage { channel: channel.to_string(), event, data });
    }

    /// Publish the same event to both a job's channel and its owning user's
    /// channel in one call, keyed by `user:<id>` and `job:<id>` — the shape
    /// every job-state transition uses.
    pub fn publish_job_event(&self, owner_user_id: Uuid, job_id: Uuid, event: Event, data: serde_json::Value) {
        self.publish(&job_channel(job_id), event, data.clone());
        self.publish(&user_channel(owner_user_id), event, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic_or_block() {
        let notifier = Notifier::new(4);
        notifier.publish("job:none", Event::JobProgress, json!({}));
    }

    #[tokio::test]
    async fn subscriber_receives_published_message() {
        let notifier = Notifier::new(4);
        let mut rx = notifier.subscribe("job:123");
        notifier.publish("job:123", Event::JobDone, json!({"ok": true}));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "job:123");
        assert!(matches!(msg.event, Event::JobDone));
        assert_eq!(msg.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn job_event_fans_out_to_both_job_and_user_channels() {
        let notifier = Notifier::new(4);
        let job_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut job_rx = notifier.subscribe(&job_channel(job_id));
        let mut user_rx = notifier.subscribe(&user_channel(user_id));

        notifier.publish_job_event(user_id, job_id, Event::JobCreated, json!({}));

        assert!(matches!(job_rx.recv().await.unwrap().event, Event::JobCreated));
        assert!(matches!(user_rx.recv().await.unwrap().event, Event::JobCreated));
    }

    #[tokio::test]
    async fn a_lagging_subscriber_drops_backlog_instead_of_blocking_the_publisher() {
        let notifier = Notifier::new(2);
        let mut rx = notifier.subscribe("job:slow");
        for i in 0..10 {
            notifier.publish("job:slow", Event::JobProgress, json!({"i": i}));
        }
        // The publisher above never blocked despite no one draining `rx`;
        // the receiver now observes a lag error instead of every message.
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, tokio::sync::broadcast::error::RecvError::Lagged(_)));
    }
}
