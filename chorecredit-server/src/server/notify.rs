//! Outbound notification events. Delivery itself is out of scope; the
//! default dispatcher just logs the event payload for the real push layer
//! to pick up.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    SubmissionApproved {
        submission_id: i32,
        minutes: i32,
        target_device: String,
        new_achievement_names: Vec<String>,
    },
    SubmissionAutoApproved {
        submission_id: i32,
        minutes: i32,
        target_device: String,
        new_achievement_names: Vec<String>,
    },
}

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, child_id: &str, event: PushEvent);
}

pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn dispatch(&self, child_id: &str, event: PushEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "<unserializable>".into());
        info!(child_id, %payload, "push event");
    }
}
