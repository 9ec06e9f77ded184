//! Field-level validation of JSON documents before they are decoded
//!
//! serde stops at the first problem; validating first lets a single error list every
//! unknown, missing and mistyped field by its dotted path.

use serde_json::Value;

use crate::error::ValidationErrors;

#[derive(Clone, Copy, Debug)]
pub enum Kind {
    String,
    Bool,
    /// Non-negative integer
    Unsigned,
    StringList,
    OneOf(&'static [&'static str]),
    /// Object with a known set of fields
    Object(&'static [Field]),
    /// Any object, contents unchecked
    Map,
    Any,
}

#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub name: &'static str,
    pub kind: Kind,
    pub required: bool,
}

pub const fn required(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: true,
    }
}

pub const fn optional(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: false,
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Check `value` against `fields`, appending problems under `prefix`. `null` counts as
/// absent. With `lenient`, unknown fields are ignored at every level.
pub fn check(
    value: &Value,
    fields: &[Field],
    prefix: &str,
    lenient: bool,
    errors: &mut ValidationErrors,
) {
    let object = match value {
        Value::Object(object) => object,
        Value::Null => {
            for field in fields.iter().filter(|f| f.required) {
                errors.missing.push(join(prefix, field.name));
            }
            return;
        }
        _ => {
            errors.invalid.push(if prefix.is_empty() {
                "<root>".to_string()
            } else {
                prefix.to_string()
            });
            return;
        }
    };

    if !lenient {
        for key in object.keys() {
            if !fields.iter().any(|f| f.name == key) {
                errors.unknown.push(join(prefix, key));
            }
        }
    }

    for field in fields {
        let path = join(prefix, field.name);
        match object.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    errors.missing.push(path);
                }
            }
            Some(value) => check_kind(value, field.kind, &path, lenient, errors),
        }
    }
}

fn check_kind(value: &Value, kind: Kind, path: &str, lenient: bool, errors: &mut ValidationErrors) {
    let valid = match kind {
        Kind::String => value.is_string(),
        Kind::Bool => value.is_boolean(),
        Kind::Unsigned => value.is_u64(),
        Kind::StringList => value
            .as_array()
            .map_or(false, |items| items.iter().all(Value::is_string)),
        Kind::OneOf(choices) => value.as_str().map_or(false, |v| choices.contains(&v)),
        Kind::Object(fields) => {
            if value.is_object() {
                check(value, fields, path, lenient, errors);
            }
            value.is_object()
        }
        Kind::Map => value.is_object(),
        Kind::Any => true,
    };

    if !valid {
        errors.invalid.push(path.to_string());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const INNER: &[Field] = &[required("path", Kind::String)];
    const FIELDS: &[Field] = &[
        required("name", Kind::String),
        optional("count", Kind::Unsigned),
        optional("mode", Kind::OneOf(&["a", "b"])),
        optional("inner", Kind::Object(INNER)),
    ];

    #[test]
    fn test_reports_every_problem() {
        let mut errors = ValidationErrors::default();
        check(
            &json!({"count": -1, "mode": "c", "inner": {"extra": 1}, "other": true}),
            FIELDS,
            "top",
            false,
            &mut errors,
        );

        assert_eq!(errors.unknown, ["top.other", "top.inner.extra"]);
        assert_eq!(errors.missing, ["top.name", "top.inner.path"]);
        assert_eq!(errors.invalid, ["top.count", "top.mode"]);
    }

    #[test]
    fn test_lenient_and_null() {
        let mut errors = ValidationErrors::default();
        check(
            &json!({"name": "x", "unknown": 1, "count": null}),
            FIELDS,
            "",
            true,
            &mut errors,
        );
        assert!(errors.is_empty());

        check(&Value::Null, FIELDS, "props", false, &mut errors);
        assert_eq!(errors.missing, ["props.name"]);
    }
}
