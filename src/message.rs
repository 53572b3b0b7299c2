//! The post message published by the CLI.

use chrono::Local;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMessage {
    pub sender: String,
    pub content: String,
    /// Local time, ISO-8601 without offset, microsecond precision
    pub created_at: String,
}

impl PostMessage {
    /// The `index`-th message from `sender`, stamped now.
    pub fn new(sender: &str, index: u32) -> Self {
        Self {
            sender: sender.to_string(),
            content: format!("message {index}"),
            created_at: Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
