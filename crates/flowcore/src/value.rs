use serde::{Deserialize, Serialize};

pub use serde_json::Value;

/// Untyped object map used for bags and projections.
pub type Map = serde_json::Map<String, Value>;

/// Accumulating key-value payload flowing through a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataBag(Map);

impl DataBag {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value. Only objects become bags.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
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

    pub fn as_map(&self) -> &Map {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Keep only `keys`, in order. Missing keys become null.
    pub fn project(&self, keys: &[String]) -> DataBag {
        project_keys(self.as_map(), keys)
    }

    /// Deep-merge an object value into the bag; later keys win.
    ///
    /// Returns false (and leaves the bag untouched) when `source` is not an object.
    pub fn merge(&mut self, source: Value) -> bool {
        match source {
            Value::Object(map) => {
                merge_maps(&mut self.0, map);
                true
            }
            _ => false,
        }
    }
}

impl From<Map> for DataBag {
    fn from(map: Map) -> Self {
        Self(map)
    }
}

impl From<DataBag> for Value {
    fn from(bag: DataBag) -> Self {
        bag.into_value()
    }
}

/// Project `keys` out of an arbitrary value. Non-objects project to all-null.
pub fn project(value: &Value, keys: &[String]) -> DataBag {
    match value {
        Value::Object(map) => project_keys(map, keys),
        _ => keys.iter().map(|k| (k.clone(), Value::Null)).collect::<Map>().into(),
    }
}

fn project_keys(map: &Map, keys: &[String]) -> DataBag {
    keys.iter()
        .map(|k| (k.clone(), map.get(k).cloned().unwrap_or(Value::Null)))
        .collect::<Map>()
        .into()
}

/// Recursive merge: objects merge key by key, anything else replaces.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(dst), Value::Object(src)) => merge_maps(dst, src),
        (dst, src) => *dst = src,
    }
}

fn merge_maps(dst: &mut Map, src: Map) {
    for (key, value) in src {
        match dst.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                dst.insert(key, value);
            }
        }
    }
}

/// Whether a work-function result counts as "no output".
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Compact JSON rendering cut to `max` characters, for log lines.
pub fn snippet<T: Serialize + ?Sized>(value: &T, max: usize) -> String {
    let rendered = serde_json::to_string(value).unwrap_or_else(|_| "<unserializable>".to_string());
    match rendered.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &rendered[..idx]),
        None => rendered,
    }
}
