//! The value carried between pipeline steps.
//!
//! A tap step may attach a richer artifact (a call graph, a coupling matrix)
//! without replacing the row sequence that generic steps work on. That
//! attachment is explicit here: [`Data::Tapped`] keeps the primary value and
//! the annotation side by side, and renderers consume the annotation.

use serde_json::{Map, Value};

/// Key under which a tap annotation appears once data is materialized.
pub const TAP_RESULT_KEY: &str = "_tap_result";

/// Key under which a tapped sequence appears once data is materialized.
pub const TAP_ITEMS_KEY: &str = "items";

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Plain(Value),
    Tapped { primary: Value, annotation: Value },
}

impl Data {
    pub fn primary(&self) -> &Value {
        match self {
            Data::Plain(v) => v,
            Data::Tapped { primary, .. } => primary,
        }
    }

    pub fn into_primary(self) -> Value {
        match self {
            Data::Plain(v) => v,
            Data::Tapped { primary, .. } => primary,
        }
    }

    pub fn annotation(&self) -> Option<&Value> {
        match self {
            Data::Plain(_) => None,
            Data::Tapped { annotation, .. } => Some(annotation),
        }
    }

    /// Replace the primary value, keeping any annotation attached.
    pub fn map_primary<E>(self, f: impl FnOnce(Value) -> Result<Value, E>) -> Result<Data, E> {
        match self {
            Data::Plain(v) => f(v).map(Data::Plain),
            Data::Tapped {
                primary,
                annotation,
            } => f(primary).map(|primary| Data::Tapped {
                primary,
                annotation,
            }),
        }
    }

    /// The value a renderer should see: the annotation when present, else the
    /// primary value. A plain mapping that already carries `_tap_result`
    /// (materialized tapped data) yields that entry.
    pub fn render_target(&self) -> &Value {
        match self {
            Data::Tapped { annotation, .. } => annotation,
            Data::Plain(v) => v
                .as_object()
                .and_then(|m| m.get(TAP_RESULT_KEY))
                .unwrap_or(v),
        }
    }

    /// Flatten into a single JSON value.
    ///
    /// A tapped sequence becomes `{"items": seq, "_tap_result": annotation}`,
    /// a tapped mapping gains a `_tap_result` entry.
    pub fn into_value(self) -> Value {
        match self {
            Data::Plain(v) => v,
            Data::Tapped {
                primary: Value::Object(mut map),
                annotation,
            } => {
                map.insert(TAP_RESULT_KEY.into(), annotation);
                Value::Object(map)
            }
            Data::Tapped {
                primary,
                annotation,
            } => {
                let mut map = Map::new();
                map.insert(TAP_ITEMS_KEY.into(), primary);
                map.insert(TAP_RESULT_KEY.into(), annotation);
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        Data::Plain(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_render_target_is_primary() {
        let d = Data::Plain(json!([1, 2]));
        assert_eq!(d.render_target(), &json!([1, 2]));
        assert!(d.annotation().is_none());
    }

    #[test]
    fn tapped_render_target_is_annotation() {
        let d = Data::Tapped {
            primary: json!([1, 2]),
            annotation: json!({"nodes": []}),
        };
        assert_eq!(d.render_target(), &json!({"nodes": []}));
        assert_eq!(d.primary(), &json!([1, 2]));
    }

    #[test]
    fn materialized_tap_result_is_still_rendered() {
        let d = Data::Plain(json!({"items": [1], "_tap_result": {"edges": []}}));
        assert_eq!(d.render_target(), &json!({"edges": []}));
    }

    #[test]
    fn tapped_sequence_materializes_with_items_key() {
        let d = Data::Tapped {
            primary: json!([1]),
            annotation: json!("a"),
        };
        assert_eq!(d.into_value(), json!({"items": [1], "_tap_result": "a"}));
    }

    #[test]
    fn tapped_mapping_materializes_inline() {
        let d = Data::Tapped {
            primary: json!({"k": 1}),
            annotation: json!(2),
        };
        assert_eq!(d.into_value(), json!({"k": 1, "_tap_result": 2}));
    }

    #[test]
    fn map_primary_keeps_annotation() {
        let d = Data::Tapped {
            primary: json!([1, 2, 3]),
            annotation: json!("g"),
        };
        let out = d
            .map_primary::<()>(|v| Ok(json!(v.as_array().map(|a| a.len()).unwrap_or(0))))
            .unwrap();
        assert_eq!(
            out,
            Data::Tapped {
                primary: json!(3),
                annotation: json!("g")
            }
        );
    }
}
