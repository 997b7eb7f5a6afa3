//! Subscription filters.

use serde::{Deserialize, Serialize};

use super::event::Event;
use super::keys::PublicKey;

/// Relay subscription filter. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<PublicKey>,

    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub p_tags: Vec<PublicKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, author: PublicKey) -> Self {
        self.authors.push(author);
        self
    }

    pub fn pubkey(mut self, pubkey: PublicKey) -> Self {
        self.p_tags.push(pubkey);
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.p_tags.is_empty() && !event.tags.public_keys().any(|pk| self.p_tags.contains(&pk)) {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        true
    }
}
