use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A record in the relay log.
///
/// Everything except `consumed` is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub description: String,
    /// Opaque payload; never inspected by the relay.
    pub content: Value,
    pub tags: BTreeSet<String>,
    pub consumed: bool,
    pub awaiting_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
}

/// Caller-supplied fields of a message; the relay fills in the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub agent_id: String,
    pub description: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewMessage {
    pub fn new(agent_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: description.into(),
            content: Value::Null,
            tags: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl Message {
    pub(crate) fn from_new(new: NewMessage, awaiting_response: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent_id: new.agent_id,
            description: new.description,
            content: new.content,
            tags: new.tags.into_iter().collect(),
            consumed: false,
            awaiting_response,
            response_to: None,
        }
    }

    /// Build the audit record for an answer to `request_id`.
    pub(crate) fn response(request_id: &str, responder_id: &str, content: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent_id: responder_id.to_string(),
            description: format!("Response to {request_id}"),
            content,
            tags: BTreeSet::new(),
            consumed: false,
            awaiting_response: false,
            response_to: Some(request_id.to_string()),
        }
    }
}

/// Selection rule shared by `receive` and `check`.
///
/// Tags are OR-matched against message tags; agent ids restrict the sender.
/// Empty sets impose no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageFilter {
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub agent_ids: BTreeSet<String>,
}

impl MessageFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_agent_ids<I, S>(mut self, agent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agent_ids = agent_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.agent_ids.is_empty()
    }

    /// True when `message` is unconsumed and passes both constraints.
    pub fn matches(&self, message: &Message) -> bool {
        if message.consumed {
            return false;
        }
        if !self.tags.is_empty() && self.tags.is_disjoint(&message.tags) {
            return false;
        }
        if !self.agent_ids.is_empty() && !self.agent_ids.contains(&message.agent_id) {
            return false;
        }
        true
    }
}
