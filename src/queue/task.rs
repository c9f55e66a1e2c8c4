use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task kinds carried by the queue. Only `create_message` has a producer
/// today; the other two are routed so they can be published without a
/// protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    CreateMessage,
    SendEmail,
    CleanupTokens,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::CreateMessage, TaskKind::SendEmail, TaskKind::CleanupTokens];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CreateMessage => "create_message",
            TaskKind::SendEmail => "send_email",
            TaskKind::CleanupTokens => "cleanup_tokens",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

/// Wire format: `{"type": "<kind>", "payload": <kind-specific JSON>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Value,
}

impl TaskEnvelope {
    pub fn new<T: Serialize>(kind: TaskKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task_type: kind.as_str().to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn kind(&self) -> Option<TaskKind> {
        TaskKind::parse(&self.task_type)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_type_and_payload_keys() {
        let env = TaskEnvelope::new(TaskKind::CreateMessage, &json!({"requested_role": "admin"})).unwrap();
        let value: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(value, json!({"type": "create_message", "payload": {"requested_role": "admin"}}));
    }

    #[test]
    fn reserved_kinds_parse() {
        let env = TaskEnvelope::from_json(r#"{"type":"cleanup_tokens","payload":null}"#).unwrap();
        assert_eq!(env.kind(), Some(TaskKind::CleanupTokens));
        assert_eq!(TaskKind::parse("send_email"), Some(TaskKind::SendEmail));
    }

    #[test]
    fn unknown_kind_still_decodes() {
        let env = TaskEnvelope::from_json(r#"{"type":"reindex","payload":{}}"#).unwrap();
        assert_eq!(env.kind(), None);
        assert!(TaskEnvelope::from_json(r#"{"payload":{}}"#).is_err());
    }
}
