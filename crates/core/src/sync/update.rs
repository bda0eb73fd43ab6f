// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update records and handlers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A change to one key, as published on a namespace channel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub update_id: String,
    /// Instance that made the change
    #[serde(rename = "instance_id")]
    pub origin_instance_id: String,
    pub key: String,
    pub value: Value,
    pub version: u64,
    /// Unix seconds
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StateUpdate {
    /// Deletions carry `{"deleted": true}` in their metadata
    pub fn is_tombstone(&self) -> bool {
        self.metadata.get("deleted") == Some(&Value::Bool(true))
    }

    pub fn tombstone_metadata() -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("deleted".to_string(), Value::Bool(true));
        metadata
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback for accepted remote updates
pub trait UpdateHandler: Send + Sync + 'static {
    fn handle(&self, update: &StateUpdate) -> Result<(), HandlerError>;
}

impl<F> UpdateHandler for F
where
    F: Fn(&StateUpdate) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, update: &StateUpdate) -> Result<(), HandlerError> {
        self(update)
    }
}

#[cfg(test)]
#[path = "update_tests.rs"]
mod tests;
