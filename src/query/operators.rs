//! `field__operator=value` query parameters -> ORM where clauses.

use crate::error::AppError;
use crate::model::ModelDescriptor;
use serde_json::{Map, Value};

pub const OPERATORS: &[&str] = &[
    "gt", "gte", "lt", "lte", "contains", "icontains", "startsWith", "endsWith", "in", "notIn", "or", "isNull",
    "isEmpty", "equals", "not",
];

pub(crate) fn single(key: &str, value: Value) -> Value {
    let mut m = Map::new();
    m.insert(key.to_string(), value);
    Value::Object(m)
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(AppError::BadRequest(format!("{} expects true or false", key))),
    }
}

/// One query pair as a where clause, with the value coerced to the field's kind.
pub fn clause(model: &ModelDescriptor, key: &str, raw: &str) -> Result<Value, AppError> {
    let (field, op) = match key.split_once("__") {
        Some((f, o)) => (f, Some(o)),
        None => (key, None),
    };
    let meta = model
        .field(field)
        .ok_or_else(|| AppError::BadRequest(format!("unknown filter field '{}' on {}", field, model.name)))?;
    let coerce = |s: &str| meta.kind.coerce(s);
    let cond = match op {
        None => coerce(raw),
        Some(op @ ("equals" | "not" | "gt" | "gte" | "lt" | "lte")) => single(op, coerce(raw)),
        Some(op @ ("contains" | "startsWith" | "endsWith")) => single(op, Value::String(raw.to_string())),
        Some("icontains") => {
            let mut m = Map::new();
            m.insert("contains".into(), Value::String(raw.to_string()));
            m.insert("mode".into(), Value::String("insensitive".into()));
            Value::Object(m)
        }
        Some(op @ ("in" | "notIn")) => single(op, Value::Array(split_list(raw).map(coerce).collect())),
        Some("isNull") => {
            if parse_bool(key, raw)? {
                Value::Null
            } else {
                single("not", Value::Null)
            }
        }
        Some("isEmpty") => single("isEmpty", Value::Bool(parse_bool(key, raw)?)),
        Some("or") => {
            let alternatives = split_list(raw).map(|v| single(field, coerce(v))).collect();
            return Ok(single("OR", Value::Array(alternatives)));
        }
        Some(other) => {
            return Err(AppError::BadRequest(format!(
                "unsupported filter operator '{}' (expected one of: {})",
                other,
                OPERATORS.join(", ")
            )))
        }
    };
    Ok(single(field, cond))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldMeta, RelationFields};
    use serde_json::json;

    fn user() -> ModelDescriptor {
        ModelDescriptor::new(
            "User",
            vec![
                FieldMeta { name: "id".into(), kind: FieldKind::Int, is_id: true },
                FieldMeta { name: "name".into(), kind: FieldKind::String, is_id: false },
                FieldMeta { name: "age".into(), kind: FieldKind::Int, is_id: false },
            ],
            RelationFields::default(),
        )
    }

    #[test]
    fn plain_equality_is_coerced() {
        assert_eq!(clause(&user(), "age", "3").unwrap(), json!({"age": 3}));
        assert_eq!(clause(&user(), "name", "3").unwrap(), json!({"name": "3"}));
    }

    #[test]
    fn operator_suffixes() {
        let u = user();
        assert_eq!(clause(&u, "age__gte", "18").unwrap(), json!({"age": {"gte": 18}}));
        assert_eq!(clause(&u, "id__in", "1, 2,3").unwrap(), json!({"id": {"in": [1, 2, 3]}}));
        assert_eq!(
            clause(&u, "name__icontains", "Al").unwrap(),
            json!({"name": {"contains": "Al", "mode": "insensitive"}})
        );
        assert_eq!(clause(&u, "name__isNull", "true").unwrap(), json!({"name": null}));
        assert_eq!(clause(&u, "name__isNull", "false").unwrap(), json!({"name": {"not": null}}));
        assert_eq!(
            clause(&u, "name__or", "a,b").unwrap(),
            json!({"OR": [{"name": "a"}, {"name": "b"}]})
        );
    }

    #[test]
    fn unknown_field_or_operator_is_rejected() {
        assert!(matches!(clause(&user(), "nope", "1"), Err(AppError::BadRequest(_))));
        assert!(matches!(clause(&user(), "age__between", "1"), Err(AppError::BadRequest(_))));
    }
}
