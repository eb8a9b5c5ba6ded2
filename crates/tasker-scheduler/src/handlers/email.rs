//! Email task: simulated delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tasker_core::{Result, TaskPayload, TaskType, TaskerError};

use super::{now_iso, short_id, simulate, str_field, string_list};
use crate::task::TaskHandler;

pub struct EmailHandler {
    latency: Duration,
}

impl EmailHandler {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub fn is_valid_email(addr: &str) -> bool {
    if addr.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = addr.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

#[async_trait]
impl TaskHandler for EmailHandler {
    fn task_type(&self) -> TaskType {
        TaskType::Email
    }

    fn default_name(&self) -> &str {
        "Send email"
    }

    fn default_payload(&self) -> TaskPayload {
        let mut p = TaskPayload::new();
        p.insert("to".into(), json!([]));
        p.insert("cc".into(), json!([]));
        p.insert("bcc".into(), json!([]));
        p.insert("subject".into(), json!("Subject"));
        p.insert("body".into(), json!("Message body"));
        p.insert("attachments".into(), json!([]));
        p
    }

    fn validate(&self, payload: &TaskPayload) -> Result<()> {
        let to = string_list(payload, "to");
        if to.is_empty() {
            return Err(TaskerError::Validation(
                "email: at least one recipient in 'to' is required".into(),
            ));
        }
        if str_field(payload, "subject").is_none() {
            return Err(TaskerError::Validation("email: 'subject' is required".into()));
        }
        if str_field(payload, "body").is_none() {
            return Err(TaskerError::Validation("email: 'body' is required".into()));
        }
        let recipients = to
            .iter()
            .chain(string_list(payload, "cc").iter())
            .chain(string_list(payload, "bcc").iter())
            .find(|addr| !is_valid_email(addr))
            .cloned();
        if let Some(bad) = recipients {
            return Err(TaskerError::Validation(format!(
                "email: invalid address '{bad}'"
            )));
        }
        Ok(())
    }

    async fn execute(&self, payload: &mut TaskPayload) -> Result<String> {
        simulate(self.latency).await;
        let count = string_list(payload, "to").len()
            + string_list(payload, "cc").len()
            + string_list(payload, "bcc").len();
        payload.insert("message_id".into(), json!(short_id()));
        payload.insert("sent_at".into(), json!(now_iso()));
        tracing::debug!("📧 Simulated email to {count} recipient(s)");
        Ok(format!("Email sent to {count} recipient(s)"))
    }

    fn reset_generated(&self, payload: &mut TaskPayload) {
        payload.remove("message_id");
        payload.remove("sent_at");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(to: serde_json::Value) -> TaskPayload {
        let mut p = EmailHandler::new(Duration::ZERO).default_payload();
        p.insert("to".into(), to);
        p
    }

    #[test]
    fn test_email_format() {
        assert!(is_valid_email("ops@example.com"));
        assert!(is_valid_email("a.b@mail.example.org"));
        assert!(!is_valid_email("no-at.example.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@com."));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_validate() {
        let h = EmailHandler::new(Duration::ZERO);
        assert!(h.validate(&payload(json!([]))).is_err());
        assert!(h.validate(&payload(json!(["bad"]))).is_err());
        assert!(h.validate(&payload(json!(["ok@example.com"]))).is_ok());

        let mut p = payload(json!(["ok@example.com"]));
        p.insert("cc".into(), json!(["nope"]));
        assert!(h.validate(&p).is_err());
    }

    #[tokio::test]
    async fn test_execute_sets_generated_fields() {
        let h = EmailHandler::new(Duration::ZERO);
        let mut p = payload(json!(["ok@example.com"]));
        let msg = h.execute(&mut p).await.unwrap();
        assert_eq!(msg, "Email sent to 1 recipient(s)");
        assert!(p.contains_key("message_id"));
        assert!(p.contains_key("sent_at"));

        h.reset_generated(&mut p);
        assert!(!p.contains_key("message_id"));
        assert!(!p.contains_key("sent_at"));
    }
}
