//! Owns the state tree and scopes all access under the `game` root key.
//!
//! The wire protocol's deltas describe the game subtree, so flushing here
//! yields exactly what gets sent to clients and appended to the gamelog.

use serde_json::{Map, Value};

use crate::delta_mergeable::DeltaMergeable;

#[derive(Debug, Default)]
pub struct DeltaManager {
    root: DeltaMergeable,
}

const GAME_KEY: &str = "game";

impl DeltaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes under `game.<path>`. Returns whether anything changed.
    pub fn set(&mut self, path: &[&str], value: &Value) -> bool {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(GAME_KEY);
        full.extend_from_slice(path);
        self.root.set(&full, value)
    }

    /// Reads the full value under `game.<path>`.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(GAME_KEY);
        full.extend_from_slice(path);
        self.root.get(&full)
    }

    pub fn contains(&self, path: &[&str]) -> bool {
        let mut full = Vec::with_capacity(path.len() + 1);
        full.push(GAME_KEY);
        full.extend_from_slice(path);
        self.root.contains(&full)
    }

    /// The minimal game-state diff since the last flush. Empty object when
    /// nothing changed.
    pub fn flush(&mut self) -> Value {
        let diff = self.root.flush();
        diff.get(GAME_KEY)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}
