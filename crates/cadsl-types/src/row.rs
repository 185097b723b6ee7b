//! Row shapes: raw query rows (keys may carry the `?` variable marker) and
//! clean rows produced by `select`.
//!
//! The store returns rows keyed either by raw query variables (`?name`) or by
//! plain names. [`RawRow::resolve`] is the only place that bridges the two.

use serde_json::{Map, Value};

/// Leading marker on query-variable keys.
pub const VAR_PREFIX: char = '?';

/// A row whose keys are plain output names.
pub type CleanRow = Map<String, Value>;

/// Read-only view over a row as returned by the store.
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> RawRow<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    /// View a value as a row, if it is a mapping.
    pub fn from_value(value: &'a Value) -> Option<Self> {
        value.as_object().map(Self::new)
    }

    /// Look up `name` exactly, then as the `?`-prefixed variable.
    pub fn resolve(&self, name: &str) -> Option<&'a Value> {
        if let Some(v) = self.fields.get(name) {
            return Some(v);
        }
        if name.starts_with(VAR_PREFIX) {
            return None;
        }
        self.fields.get(&format!("{VAR_PREFIX}{name}"))
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.fields
    }
}

/// Strip every leading `?` marker from an output name.
pub fn clean_key(name: &str) -> &str {
    name.trim_start_matches(VAR_PREFIX)
}
