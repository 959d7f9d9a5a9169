use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Session context: a JSON object whose top-level keys are capability
/// namespaces.
///
/// Merging is shallow. A fragment's top-level keys replace the existing
/// keys wholesale; nested objects are never combined. A capability that
/// wants to accumulate state inside its namespace has to read the current
/// value, modify it, and hand the whole namespace back.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Shallow-merge `fragment` into this context. Returns true when at
    /// least one key changed; re-sending an identical value is not a write.
    pub fn merge(&mut self, fragment: Context) -> bool {
        let mut wrote = false;
        for (key, value) in fragment.0 {
            if self.0.get(&key) != Some(&value) {
                let _ = self.0.insert(key, value);
                wrote = true;
            }
        }
        wrote
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Context {
    type Error = Value;

    /// Only JSON objects are contexts; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One dispatch recorded in a turn's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub capability: String,
    pub input: String,
    pub output: String,
}
