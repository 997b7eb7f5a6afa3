//! Protocol message envelope: `{"order": {version, request_id?, action, id?, content}}`.

use serde::{Deserialize, Serialize};

use super::action::Action;
use super::content::{validate_for_action, Content};
use crate::types::{Error, Result};

pub const PROTOCOL_VERSION: u8 = 1;

/// One request or reply exchanged with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub action: Action,
    /// Subject order id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Serialize, Deserialize)]
struct Wire<M> {
    order: M,
}

impl Message {
    pub fn new(action: Action, id: Option<String>, content: Option<Content>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            request_id: None,
            action,
            id,
            content,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Whether this message concerns `action` on order `order_id`.
    pub fn is(&self, action: &Action, order_id: &str) -> bool {
        &self.action == action && self.id.as_deref() == Some(order_id)
    }

    pub fn validate(&self) -> Result<()> {
        validate_for_action(&self.action, self.content.as_ref())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&Wire { order: self })?)
    }

    /// Parse and validate an inbound rumor body.
    pub fn from_json(s: &str) -> Result<Self> {
        let wire: Wire<Message> = serde_json::from_str(s)
            .map_err(|e| Error::invalid_message(format!("not a protocol message: {}", e)))?;
        wire.order.validate()?;
        Ok(wire.order)
    }
}
