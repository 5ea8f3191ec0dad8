//! Run-scoped shared state.
//!
//! Every run gets its own [`RunContext`]; handlers of that run share it
//! through an `Arc`. Values are JSON documents stored per key in a
//! `DashMap`, so writers to different keys never contend and writers to the
//! same key go through that key's lock. Compound updates (`merge_into`,
//! `insert_entry`) run entirely under the lock instead of get-then-set.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::barrier::{BarrierSet, StageCell};

#[derive(Debug, Default)]
pub struct RunContext {
    values: DashMap<String, Value>,
    barriers: BarrierSet,
    stage: StageCell,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserialize a stored value; `None` when absent or of another shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.value().as_str().map(str::to_string))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Append `item` to the array under `key` unless already present.
    ///
    /// A missing or non-array value is replaced by a fresh array. Returns
    /// whether the item was added.
    pub fn merge_into(&self, key: &str, item: impl Into<Value>) -> bool {
        let item = item.into();
        let mut entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }

        match entry.as_array_mut() {
            Some(items) if !items.contains(&item) => {
                items.push(item);
                true
            }
            _ => false,
        }
    }

    /// Insert `value` under `id` in the object stored at `key`, leaving
    /// sibling entries untouched. Returns the previous value for `id`.
    pub fn insert_entry(&self, key: &str, id: &str, value: impl Into<Value>) -> Option<Value> {
        let mut entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        entry
            .as_object_mut()
            .and_then(|map| map.insert(id.to_string(), value.into()))
    }

    /// Object entries stored at `key`, ordered by id
    pub fn entries(&self, key: &str) -> BTreeMap<String, Value> {
        match self.get(key) {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Array items stored at `key`
    pub fn list(&self, key: &str) -> Vec<Value> {
        match self.get(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    /// String items of the array stored at `key`
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.list(key)
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Copy of every stored value
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn barriers(&self) -> &BarrierSet {
        &self.barriers
    }

    pub fn stage(&self) -> &StageCell {
        &self.stage
    }
}
