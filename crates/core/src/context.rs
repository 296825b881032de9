use crate::types::StepId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value input supplied to a workflow run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputContext(Map<String, Value>);

impl InputContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from any JSON value; non-objects are stored under `"input"`
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            Value::Null => Self::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                Self(map)
            }
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Truthiness of a flag; a missing key is false
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => !(s.is_empty() || s == "false" || s == "0"),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// Run input plus each dependency output under its node id
    pub fn merged_with<'a, I>(&self, outputs: I) -> Value
    where
        I: IntoIterator<Item = (&'a StepId, &'a Value)>,
    {
        let mut merged = self.0.clone();
        for (node_id, output) in outputs {
            merged.insert(node_id.0.clone(), output.clone());
        }
        Value::Object(merged)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for InputContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
