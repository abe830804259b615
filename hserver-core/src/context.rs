//! Per-request context shared by every handler of a request.
//!
//! `enter` and `leave` handlers run as detached tasks alongside the rest of
//! the pipeline, so the context is a cheap-clone handle over shared state
//! rather than a value threaded through the stages.
//!
//! The `params` entry is backed by the typed [`Params`] the router writes.
//! Reading it through [`Context::get`] or [`Context::to_value`] and through
//! [`Context::params`] always gives the same captures.

use crate::logging::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context key under which route captures are exposed.
pub const PARAMS_KEY: &str = "params";

/// Parameter captures: name to the decoded capture groups of its pattern.
///
/// Index 0 holds the whole match, later indices the pattern's own groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Vec<String>>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.0.insert(name.into(), values);
    }

    /// All captures for `name`, whole match first.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// The whole match captured for `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object of name to capture array.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(name, values)| (name.clone(), Value::from(values.clone())))
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    fields: RwLock<Map<String, Value>>,
    params: RwLock<Params>,
}

/// Request context handed to every stage handler.
///
/// The dispatch core only writes the route [`Params`]; every other field
/// belongs to the transport bridge and the application.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from pre-populated fields.
    ///
    /// A `params` field is parsed into the typed captures.
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let params = fields
            .remove(PARAMS_KEY)
            .and_then(parse_params)
            .unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                fields: RwLock::new(fields),
                params: RwLock::new(params),
            }),
        }
    }

    /// A copy of the field at `key`. `params` is always present.
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == PARAMS_KEY {
            return Some(self.inner.params.read().to_value());
        }
        self.inner.fields.read().get(key).cloned()
    }

    /// String field shortcut, e.g. `pathname` set by the transport bridge.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.inner
            .fields
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Set a field, returning the previous value.
    ///
    /// Writing `params` replaces the typed captures; a value that is not an
    /// object of string arrays is ignored.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        if key == PARAMS_KEY {
            let params = parse_params(value.into())?;
            let previous = std::mem::replace(&mut *self.inner.params.write(), params);
            return Some(previous.to_value());
        }
        self.inner.fields.write().insert(key, value.into())
    }

    /// Remove a field. Removing `params` clears the captures.
    pub fn remove(&self, key: &str) -> Option<Value> {
        if key == PARAMS_KEY {
            let previous = std::mem::take(&mut *self.inner.params.write());
            return Some(previous.to_value());
        }
        self.inner.fields.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        key == PARAMS_KEY || self.inner.fields.read().contains_key(key)
    }

    /// Snapshot of the route captures.
    pub fn params(&self) -> Params {
        self.inner.params.read().clone()
    }

    /// Captures for a single parameter name.
    pub fn param(&self, name: &str) -> Option<Vec<String>> {
        self.inner.params.read().get(name).map(<[String]>::to_vec)
    }

    /// Replace the route captures. Visible to every clone of this context.
    pub fn set_params(&self, params: Params) {
        *self.inner.params.write() = params;
    }

    /// Whether two handles point at the same request.
    pub fn same_request(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Render the context as a JSON object, `params` included.
    pub fn to_value(&self) -> Value {
        let mut fields = self.inner.fields.read().clone();
        fields.insert(PARAMS_KEY.to_string(), self.inner.params.read().to_value());
        Value::Object(fields)
    }
}

fn parse_params(value: Value) -> Option<Params> {
    match serde_json::from_value(value) {
        Ok(params) => Some(params),
        Err(err) => {
            debug!(error = %err, "Ignoring malformed params field");
            None
        }
    }
}
