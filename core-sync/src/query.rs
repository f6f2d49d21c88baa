//! # Query Model
//!
//! Requests against the media server are an endpoint plus a flat map of query
//! parameters. Parameter values are JSON values so builders can express
//! absent filters (`null`), booleans and comma-joined lists without guessing
//! at the server's string conventions; [`Query::query_pairs`] renders them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parameter name carrying the pagination cursor.
pub const START_INDEX: &str = "StartIndex";

/// Parameter name carrying the window size.
pub const LIMIT: &str = "Limit";

/// Query parameters, ordered by name so rendered URLs are stable.
pub type Params = BTreeMap<String, Value>;

/// An endpoint and its query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub endpoint: String,
    #[serde(default)]
    pub params: Params,
}

impl Query {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Params::new(),
        }
    }

    /// Builder-style parameter setter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Resume cursor, if the query carries one.
    pub fn start_index(&self) -> Option<u64> {
        self.params.get(START_INDEX).and_then(value_as_u64)
    }

    /// Parameters rendered as `(name, value)` pairs; `null` values are left out.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(key, value)| render_value(value).map(|v| (key.clone(), v)))
            .collect()
    }
}

/// Render a parameter value the way the server expects it in a query string.
///
/// Returns `None` for `null`, which means "leave the parameter out".
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Where to pick a paginated walk back up.
///
/// `params[StartIndex]` is the cursor of the first window not yet handed out,
/// so fetching from a restore point never repeats an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorePoint {
    pub endpoint: String,
    pub params: Params,
}

impl RestorePoint {
    pub fn new(query: &Query, next_start_index: u64) -> Self {
        let mut params = query.params.clone();
        params.insert(START_INDEX.to_string(), Value::from(next_start_index));
        Self {
            endpoint: query.endpoint.clone(),
            params,
        }
    }

    pub fn start_index(&self) -> u64 {
        self.params
            .get(START_INDEX)
            .and_then(value_as_u64)
            .unwrap_or(0)
    }

    /// Query that resumes the walk.
    pub fn into_query(self) -> Query {
        Query {
            endpoint: self.endpoint,
            params: self.params,
        }
    }
}

impl From<RestorePoint> for Query {
    fn from(point: RestorePoint) -> Self {
        point.into_query()
    }
}

/// One catalog record, kept as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Value);

impl Item {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Server identifier (`Id`).
    pub fn id(&self) -> Option<&str> {
        self.0.get("Id").and_then(Value::as_str)
    }

    /// Record type (`Type`), e.g. `Movie`, `Episode`, `MusicAlbum`.
    pub fn item_type(&self) -> Option<&str> {
        self.0.get("Type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One window of a paginated walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub items: Vec<Item>,
    pub total_record_count: u64,
    pub restore_point: RestorePoint,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Identifiers of the items in this window, in server order.
    pub fn ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.id().map(str::to_string))
            .collect()
    }
}

/// Body of a list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub total_record_count: Option<u64>,
}
