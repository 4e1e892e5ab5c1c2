//! The delta-mergeable state tree.
//!
//! All observable game state lives in one tree of nodes. Writes go through
//! [`DeltaMergeable::set`], which diffs the new value against what is stored
//! and marks only genuinely changed nodes dirty. [`DeltaMergeable::flush`]
//! then produces the minimal nested diff since the previous flush and resets
//! the tracking, so consecutive flushes with no writes in between yield empty
//! diffs.
//!
//! Deletions inside mappings are encoded with the [`DELTA_REMOVED`] sentinel
//! value; list shrinkage is encoded with the [`DELTA_LIST_LENGTH`] sentinel
//! key, because JSON diffs of arrays cannot otherwise express truncation.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use shared::{DELTA_LIST_LENGTH, DELTA_REMOVED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Primitive,
    Object,
    List,
}

/// One node of the state tree. The root is an object node.
#[derive(Debug)]
pub struct DeltaMergeable {
    kind: Kind,
    /// Stored value for primitive nodes; `Null` for containers.
    value: Value,
    /// Children keyed by map key or stringified list index.
    children: BTreeMap<String, DeltaMergeable>,
    /// Current length for list nodes.
    list_len: usize,
    /// Pending diff content at or below this node.
    dirty: bool,
    len_changed: bool,
    /// Map keys deleted since the last flush.
    removed: BTreeSet<String>,
}

impl Default for DeltaMergeable {
    fn default() -> Self {
        Self::new_root()
    }
}

impl DeltaMergeable {
    /// A clean, empty object node.
    pub fn new_root() -> Self {
        Self {
            kind: Kind::Object,
            value: Value::Null,
            children: BTreeMap::new(),
            list_len: 0,
            dirty: false,
            len_changed: false,
            removed: BTreeSet::new(),
        }
    }

    /// A node freshly created from a value. Everything in it is dirty so the
    /// whole subtree appears in the next flush.
    fn fresh(value: &Value) -> Self {
        let mut node = Self::new_root();
        node.dirty = true;
        match value {
            Value::Array(items) => {
                node.kind = Kind::List;
                node.list_len = items.len();
                node.len_changed = true;
                for (i, item) in items.iter().enumerate() {
                    node.children.insert(i.to_string(), Self::fresh(item));
                }
            }
            Value::Object(entries) => {
                for (k, v) in entries {
                    node.children.insert(k.clone(), Self::fresh(v));
                }
            }
            primitive => {
                node.kind = Kind::Primitive;
                node.value = primitive.clone();
            }
        }
        node
    }

    /// Writes a value at a path, creating intermediate object nodes as
    /// needed. Returns whether anything actually changed.
    pub fn set(&mut self, path: &[&str], value: &Value) -> bool {
        debug_assert!(!path.is_empty(), "set requires a non-empty path");
        let key = path[0];
        let changed = if path.len() == 1 {
            self.note_list_growth(key);
            match self.children.get_mut(key) {
                Some(child) => child.apply(value),
                None => {
                    self.removed.remove(key);
                    self.children.insert(key.to_string(), Self::fresh(value));
                    true
                }
            }
        } else {
            self.removed.remove(key);
            self.note_list_growth(key);
            let child = self
                .children
                .entry(key.to_string())
                .or_insert_with(Self::new_root);
            // Writing through a primitive replaces it with an object node,
            // otherwise the diff would drop the nested write.
            let converted = child.kind == Kind::Primitive;
            if converted {
                child.kind = Kind::Object;
                child.value = Value::Null;
                child.dirty = true;
            }
            child.set(&path[1..], value) || converted
        };
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Keeps `list_len` in step when a list element is addressed directly.
    fn note_list_growth(&mut self, key: &str) {
        if self.kind != Kind::List {
            return;
        }
        if let Ok(index) = key.parse::<usize>() {
            if index >= self.list_len {
                self.list_len = index + 1;
                self.len_changed = true;
                self.dirty = true;
            }
        }
    }

    /// Diffs a new value against this node's stored state, updating only
    /// what differs. Returns whether anything changed.
    fn apply(&mut self, value: &Value) -> bool {
        match value {
            Value::Array(items) => self.apply_list(items),
            Value::Object(entries) => self.apply_object(entries),
            primitive => self.apply_primitive(primitive),
        }
    }

    fn apply_primitive(&mut self, value: &Value) -> bool {
        let mut changed = false;
        if self.kind != Kind::Primitive {
            self.children.clear();
            self.removed.clear();
            self.list_len = 0;
            self.len_changed = false;
            self.kind = Kind::Primitive;
            changed = true;
        }
        if self.value != *value {
            self.value = value.clone();
            changed = true;
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    fn apply_list(&mut self, items: &[Value]) -> bool {
        let mut changed = false;
        if self.kind != Kind::List {
            self.children.clear();
            self.removed.clear();
            self.value = Value::Null;
            self.list_len = 0;
            self.kind = Kind::List;
            changed = true;
        }
        for (i, item) in items.iter().enumerate() {
            let key = i.to_string();
            changed |= match self.children.get_mut(&key) {
                Some(child) => child.apply(item),
                None => {
                    self.children.insert(key, Self::fresh(item));
                    true
                }
            };
        }
        for i in items.len()..self.list_len {
            self.children.remove(&i.to_string());
            changed = true;
        }
        if self.list_len != items.len() {
            self.list_len = items.len();
            self.len_changed = true;
            changed = true;
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    fn apply_object(&mut self, entries: &Map<String, Value>) -> bool {
        let mut changed = false;
        if self.kind != Kind::Object {
            self.children.clear();
            self.removed.clear();
            self.value = Value::Null;
            self.list_len = 0;
            self.len_changed = false;
            self.kind = Kind::Object;
            changed = true;
        }
        for (key, item) in entries {
            changed |= match self.children.get_mut(key) {
                Some(child) => child.apply(item),
                None => {
                    self.removed.remove(key);
                    self.children.insert(key.clone(), Self::fresh(item));
                    true
                }
            };
        }
        let stale: Vec<String> = self
            .children
            .keys()
            .filter(|k| !entries.contains_key(*k))
            .cloned()
            .collect();
        for key in stale {
            self.children.remove(&key);
            self.removed.insert(key);
            changed = true;
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Reads the full value stored at a path, if the path exists.
    pub fn get(&self, path: &[&str]) -> Option<Value> {
        let mut node = self;
        for key in path {
            node = node.children.get(*key)?;
        }
        Some(node.to_value())
    }

    pub fn contains(&self, path: &[&str]) -> bool {
        let mut node = self;
        for key in path {
            match node.children.get(*key) {
                Some(child) => node = child,
                None => return false,
            }
        }
        true
    }

    /// Materializes this node's full current value.
    pub fn to_value(&self) -> Value {
        match self.kind {
            Kind::Primitive => self.value.clone(),
            Kind::Object => Value::Object(
                self.children
                    .iter()
                    .map(|(k, c)| (k.clone(), c.to_value()))
                    .collect(),
            ),
            Kind::List => Value::Array(
                (0..self.list_len)
                    .map(|i| {
                        self.children
                            .get(&i.to_string())
                            .map(Self::to_value)
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            ),
        }
    }

    /// Produces the minimal diff since the previous flush and clears the
    /// change tracking. A flush with nothing pending is an empty object.
    pub fn flush(&mut self) -> Value {
        if !self.dirty {
            return Value::Object(Map::new());
        }
        let diff = self.diff();
        self.clear_tracking();
        diff
    }

    fn diff(&self) -> Value {
        match self.kind {
            Kind::Primitive => self.value.clone(),
            Kind::Object | Kind::List => {
                let mut map = Map::new();
                if self.kind == Kind::List && self.len_changed {
                    map.insert(DELTA_LIST_LENGTH.to_string(), Value::from(self.list_len));
                }
                for key in &self.removed {
                    map.insert(key.clone(), Value::String(DELTA_REMOVED.to_string()));
                }
                for (key, child) in &self.children {
                    if child.dirty {
                        map.insert(key.clone(), child.diff());
                    }
                }
                Value::Object(map)
            }
        }
    }

    fn clear_tracking(&mut self) {
        self.dirty = false;
        self.len_changed = false;
        self.removed.clear();
        for child in self.children.values_mut() {
            if child.dirty {
                child.clear_tracking();
            }
        }
    }
}

/// Whether a flushed diff carries no changes.
pub fn is_empty_diff(diff: &Value) -> bool {
    diff.as_object().is_some_and(Map::is_empty)
}
