//! Social post task: simulated publication.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tasker_core::{Result, TaskPayload, TaskType, TaskerError};

use super::{now_iso, short_id, simulate, str_field};
use crate::task::TaskHandler;

/// Character limit on twitter / x.
pub const SHORT_POST_LIMIT: usize = 280;

pub struct SocialHandler {
    latency: Duration,
}

impl SocialHandler {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

fn has_short_limit(platform: &str) -> bool {
    matches!(platform.to_lowercase().as_str(), "twitter" | "x")
}

#[async_trait]
impl TaskHandler for SocialHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Social
    }

    fn default_name(&self) -> &str {
        "Social post"
    }

    fn default_payload(&self) -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("platform".into(), json!("twitter"));
        p.insert("message".into(), json!("Default message"));
        p.insert("tags".into(), json!([]));
        p.insert("attachments".into(), json!([]));
        p
    }

    fn validate(&self, payload: &TaskPayload) -> Result<()> {
        let Some(message) = str_field(payload, "message") else {
            return Err(TaskerError::Validation("social: message cannot be empty".into()));
        };
        let platform = str_field(payload, "platform").unwrap_or("twitter");
        if has_short_limit(platform) && message.chars().count() > SHORT_POST_LIMIT {
            return Err(TaskerError::Validation(format!(
                "social: message exceeds {SHORT_POST_LIMIT} characters for {platform}"
            )));
        }
        Ok(())
    }

    async fn execute(&self, payload: &mut TaskPayload) -> Result<String> {
        simulate(self.latency).await;
        let platform = str_field(payload, "platform").unwrap_or("twitter").to_string();
        payload.insert("post_id".into(), json!(short_id()));
        payload.insert("published_at".into(), json!(now_iso()));
        Ok(format!("Post published on {platform}"))
    }

    fn reset_generated(&self, payload: &mut TaskPayload) {
        payload.remove("post_id");
        payload.remove("published_at");
    }
}
