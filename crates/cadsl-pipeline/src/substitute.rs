//! `{Name}` placeholder substitution for query text and format strings.
//!
//! Two separate passes run over structured query text: concept tags from the
//! closed [`CONCEPTS`] list first, then execution parameters. Each pass scans
//! the text once and never rescans inserted text.

use std::collections::HashMap;

use serde_json::Value;

use cadsl_types::value::display;
use cadsl_types::{Context, Fault};

/// Code-entity concepts that resolve to a language-qualified type name.
pub const CONCEPTS: &[&str] = &[
    "CodeEntity",
    "Module",
    "Class",
    "Function",
    "Method",
    "Constructor",
    "Parameter",
    "Import",
    "Export",
    "Assignment",
    "Field",
    "Attribute",
    "TryBlock",
    "CatchClause",
    "ThrowStatement",
    "ReturnStatement",
    "Call",
    "ExceptHandler",
    "RaiseStatement",
    "FinallyBlock",
    "ArrowFunction",
    "Variable",
    "FinallyClause",
    "Namespace",
    "TranslationUnit",
    "Struct",
    "Destructor",
    "Operator",
    "Enum",
    "EnumClass",
    "Enumerator",
    "UsingDirective",
    "UsingDeclaration",
    "Inheritance",
    "Document",
    "Element",
    "Script",
    "ScriptReference",
    "StyleSheet",
    "Form",
    "FormInput",
    "Link",
    "EventHandler",
    "Meta",
    "Image",
    "Iframe",
];

pub fn is_concept(name: &str) -> bool {
    CONCEPTS.contains(&name)
}

/// Replace every `{name}` for which `lookup` yields a value. Braces that do not
/// enclose a plain identifier are copied through untouched.
pub fn replace_placeholders<F>(text: &str, mut lookup: F) -> Result<String, Fault>
where
    F: FnMut(&str) -> Result<Option<String>, Fault>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let closed = after[name_len..].starts_with('}');
        if closed && !name.is_empty() {
            if let Some(replacement) = lookup(name)? {
                out.push_str(&replacement);
                rest = &after[name_len + 1..];
                continue;
            }
        }
        out.push('{');
        rest = after;
    }
    out.push_str(rest);
    Ok(out)
}

/// Concept pass: `{Class}` to the language-qualified name for `ctx.language()`.
pub fn substitute_concepts(text: &str, ctx: &Context) -> Result<String, Fault> {
    replace_placeholders(text, |name| {
        if is_concept(name) {
            ctx.languages().concept(name, ctx.language()).map(Some)
        } else {
            Ok(None)
        }
    })
}

/// Parameter pass: `{name}` to the displayed value of `params[name]`.
pub fn substitute_params(text: &str, params: &HashMap<String, Value>) -> String {
    let replaced: Result<String, Fault> =
        replace_placeholders(text, |name| Ok(params.get(name).map(display)));
    replaced.unwrap_or_else(|_| text.to_string())
}

/// Resolve a value that is exactly `"{name}"` to the parameter itself,
/// keeping its type. Anything else is returned as given.
pub fn resolve_param_ref(value: &Value, ctx: &Context) -> Value {
    if let Some(name) = value.as_str().and_then(param_ref_name) {
        if let Some(v) = ctx.get_param(name) {
            return v.clone();
        }
    }
    value.clone()
}

/// `"{name}"` to `Some("name")`.
pub fn param_ref_name(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    let valid = !inner.is_empty()
        && inner
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concept_list_is_closed() {
        assert_eq!(CONCEPTS.len(), 46);
        assert!(is_concept("Method"));
        assert!(!is_concept("method"));
    }

    #[test]
    fn concepts_resolve_by_language() {
        let ctx = Context::detached().with_language("python");
        let q = substitute_concepts("SELECT ?c WHERE { ?c type {Class} }", &ctx).unwrap();
        assert_eq!(q, "SELECT ?c WHERE { ?c type py:Class }");
    }

    #[test]
    fn unknown_placeholders_survive_concept_pass() {
        let ctx = Context::detached();
        let q = substitute_concepts("{limit} {Method} {", &ctx).unwrap();
        assert_eq!(q, "{limit} oo:Method {");
    }

    #[test]
    fn concept_pass_propagates_language_faults() {
        let ctx = Context::detached().with_language("cobol");
        let err = substitute_concepts("{Class}", &ctx).unwrap_err();
        assert_eq!(err.0, "Unsupported language: cobol");
    }

    #[test]
    fn params_are_displayed() {
        let mut params = HashMap::new();
        params.insert("name".to_string(), json!("foo"));
        params.insert("n".to_string(), json!(5));
        assert_eq!(
            substitute_params("FILTER(?name = \"{name}\") LIMIT {n} {other}", &params),
            "FILTER(?name = \"foo\") LIMIT 5 {other}"
        );
    }

    #[test]
    fn inserted_text_is_not_rescanned() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), json!("{b}"));
        params.insert("b".to_string(), json!("x"));
        assert_eq!(substitute_params("{a}{b}", &params), "{b}x");
    }

    #[test]
    fn param_named_like_concept_does_not_collide() {
        let ctx = Context::detached().with_param("Class", json!("zzz"));
        let q = substitute_concepts("{Class}", &ctx).unwrap();
        assert_eq!(substitute_params(&q, ctx.params()), "oo:Class");
    }

    #[test]
    fn resolve_param_ref_keeps_type() {
        let ctx = Context::detached().with_param("limit", json!(7));
        assert_eq!(resolve_param_ref(&json!("{limit}"), &ctx), json!(7));
        assert_eq!(resolve_param_ref(&json!("{missing}"), &ctx), json!("{missing}"));
        assert_eq!(resolve_param_ref(&json!("x{limit}"), &ctx), json!("x{limit}"));
        assert_eq!(resolve_param_ref(&json!(3), &ctx), json!(3));
    }

    #[test]
    fn param_ref_name_requires_whole_placeholder() {
        assert_eq!(param_ref_name("{fmt}"), Some("fmt"));
        assert_eq!(param_ref_name("{}"), None);
        assert_eq!(param_ref_name("{a b}"), None);
        assert_eq!(param_ref_name("fmt"), None);
    }
}
