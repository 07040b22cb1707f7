use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use weft_core::error::{GraphError, Result};

/// How a partial update for one key combines with the existing value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// The update replaces the current value.
    #[default]
    Overwrite,
    /// Items are appended after the existing sequence.
    Append,
    /// Shallow key-wise merge; the update wins on conflicting sub-keys.
    MergeMapping,
}

/// Keys written by one merge, in update order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub keys: Vec<String>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Per-key reducer declarations of a graph. Undeclared keys overwrite.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    reducers: HashMap<String, Reducer>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, key: impl Into<String>, reducer: Reducer) {
        self.reducers.insert(key.into(), reducer);
    }

    pub fn reducer(&self, key: &str) -> Reducer {
        self.reducers.get(key).copied().unwrap_or_default()
    }

    /// Merge a node's partial update into `state`.
    ///
    /// `null` is an empty update. Any other non-object update, and any
    /// reducer type mismatch, is a state error; `state` is left untouched in
    /// that case.
    pub fn merge(&self, state: &mut Map<String, Value>, update: &Value) -> Result<StateDelta> {
        let entries = match update {
            Value::Null => return Ok(StateDelta::default()),
            Value::Object(map) => map,
            other => {
                return Err(GraphError::State(format!(
                    "node update must be an object, got {}",
                    kind(other)
                ))
                .into());
            }
        };

        let mut merged = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let current = state.get(key).unwrap_or(&Value::Null);
            merged.push((key, self.reduce(key, current, value)?));
        }

        let mut delta = StateDelta::default();
        for (key, value) in merged {
            state.insert(key.clone(), value);
            delta.keys.push(key.clone());
        }
        Ok(delta)
    }

    fn reduce(&self, key: &str, current: &Value, update: &Value) -> Result<Value> {
        match self.reducer(key) {
            Reducer::Overwrite => Ok(update.clone()),
            Reducer::Append => {
                let mut items = match current {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.clone(),
                    other => {
                        return Err(GraphError::State(format!(
                            "cannot append to '{key}': existing value is {}",
                            kind(other)
                        ))
                        .into());
                    }
                };
                match update {
                    Value::Array(new) => items.extend(new.iter().cloned()),
                    item => items.push(item.clone()),
                }
                Ok(Value::Array(items))
            }
            Reducer::MergeMapping => {
                let mut map = match current {
                    Value::Null => Map::new(),
                    Value::Object(map) => map.clone(),
                    other => {
                        return Err(GraphError::State(format!(
                            "cannot merge into '{key}': existing value is {}",
                            kind(other)
                        ))
                        .into());
                    }
                };
                let Value::Object(new) = update else {
                    return Err(GraphError::State(format!(
                        "cannot merge {} into mapping '{key}'",
                        kind(update)
                    ))
                    .into());
                };
                for (sub_key, value) in new {
                    map.insert(sub_key.clone(), value.clone());
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// `(key, sub_key)` pairs an update writes into merge-mapping keys.
    pub fn mapping_writes(&self, update: &Value) -> Vec<(String, String)> {
        let Value::Object(entries) = update else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(key, _)| self.reducer(key) == Reducer::MergeMapping)
            .filter_map(|(key, value)| value.as_object().map(|m| (key, m)))
            .flat_map(|(key, map)| map.keys().map(move |sub| (key.clone(), sub.clone())))
            .collect()
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
