//! Turns relation keys in request bodies into nested ORM writes.
//!
//! Accepted forms per relation key: the ORM's nested syntax (`{connect: ..}`), an object
//! carrying `apiAction`, a bare object (id only: connect; no id: create; id plus data on
//! update: update), or a bare id (connect). List relations take an array of those.

use crate::error::AppError;
use crate::model::{ModelDescriptor, ModelKeys, RelationField};
use crate::query::operators::single;
use serde_json::{Map, Value};

const NESTED_OPS: &[&str] = &["connect", "create", "update", "delete", "disconnect"];
const API_ACTION: &str = "apiAction";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
}

/// Relation ids are read from each target model's own id field, as listed in `keys`.
pub fn normalize_relations(
    model: &ModelDescriptor,
    keys: &ModelKeys,
    body: Map<String, Value>,
    kind: WriteKind,
) -> Result<Map<String, Value>, AppError> {
    let mut out = Map::new();
    for (key, value) in body {
        let Some(rel) = model.relation(&key) else {
            out.insert(key, value);
            continue;
        };
        let id_field = keys.id_field_of(&rel.target_type_name);
        let nested = if rel.is_array {
            normalize_list(id_field, rel, value, kind)?
        } else {
            normalize_singular(id_field, rel, value, kind)?
        };
        if let Some(n) = nested {
            out.insert(key, n);
        }
    }
    Ok(out)
}

fn is_nested_syntax(m: &Map<String, Value>) -> bool {
    !m.is_empty() && m.keys().all(|k| NESTED_OPS.contains(&k.as_str()))
}

fn check_allowed(rel: &RelationField, op: &str, kind: WriteKind) -> Result<(), AppError> {
    if !NESTED_OPS.contains(&op) {
        return Err(AppError::validation(
            rel.name.clone(),
            format!("unknown relation action '{}'", op),
        ));
    }
    if kind == WriteKind::Create && matches!(op, "update" | "delete" | "disconnect") {
        return Err(AppError::validation(
            rel.name.clone(),
            format!("'{}' is not allowed when creating a record", op),
        ));
    }
    Ok(())
}

fn take_action(rel: &RelationField, m: &mut Map<String, Value>) -> Result<Option<String>, AppError> {
    match m.remove(API_ACTION) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(AppError::validation(
            rel.name.clone(),
            format!("apiAction must be a string, got {}", other),
        )),
    }
}

fn infer_action(id_field: &str, m: &Map<String, Value>, kind: WriteKind) -> &'static str {
    let has_id = m.get(id_field).map(|v| !v.is_null()).unwrap_or(false);
    match (has_id, m.len(), kind) {
        (false, _, _) => "create",
        (true, 1, _) | (true, _, WriteKind::Create) => "connect",
        (true, _, WriteKind::Update) => "update",
    }
}

fn id_of(rel: &RelationField, id_field: &str, m: &Map<String, Value>) -> Result<Value, AppError> {
    m.get(id_field)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| AppError::validation(rel.name.clone(), format!("'{}' is required for this action", id_field)))
}

fn normalize_singular(
    id_field: &str,
    rel: &RelationField,
    value: Value,
    kind: WriteKind,
) -> Result<Option<Value>, AppError> {
    match value {
        Value::Null => Ok(match kind {
            WriteKind::Create => None,
            WriteKind::Update => Some(single("disconnect", Value::Bool(true))),
        }),
        Value::Object(m) if is_nested_syntax(&m) => {
            for op in m.keys() {
                check_allowed(rel, op, kind)?;
            }
            Ok(Some(Value::Object(m)))
        }
        Value::Object(mut m) => {
            let action = match take_action(rel, &mut m)? {
                Some(a) => a,
                None => infer_action(id_field, &m, kind).to_string(),
            };
            check_allowed(rel, &action, kind)?;
            Ok(Some(match action.as_str() {
                "connect" => single("connect", single(id_field, id_of(rel, id_field, &m)?)),
                "create" => single("create", Value::Object(m)),
                "update" => {
                    m.remove(id_field);
                    single("update", Value::Object(m))
                }
                op => single(op, Value::Bool(true)),
            }))
        }
        Value::Array(_) => Err(AppError::validation(rel.name.clone(), "expected an object or an id, got a list")),
        id => Ok(Some(single("connect", single(id_field, id)))),
    }
}

fn normalize_list(
    id_field: &str,
    rel: &RelationField,
    value: Value,
    kind: WriteKind,
) -> Result<Option<Value>, AppError> {
    let items = match value {
        Value::Null => return Ok(None),
        Value::Object(m) if is_nested_syntax(&m) => {
            for op in m.keys() {
                check_allowed(rel, op, kind)?;
            }
            return Ok(Some(Value::Object(m)));
        }
        Value::Array(items) => items,
        other => vec![other],
    };
    let mut grouped: Map<String, Value> = Map::new();
    let mut push = |op: &str, v: Value| {
        if let Value::Array(list) = grouped
            .entry(op.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            list.push(v);
        }
    };
    for item in items {
        let mut m = match item {
            Value::Object(m) => m,
            Value::Null => continue,
            id => {
                push("connect", single(id_field, id));
                continue;
            }
        };
        let action = match take_action(rel, &mut m)? {
            Some(a) => a,
            None => infer_action(id_field, &m, kind).to_string(),
        };
        check_allowed(rel, &action, kind)?;
        match action.as_str() {
            "create" => push("create", Value::Object(m)),
            "update" => {
                let id = id_of(rel, id_field, &m)?;
                m.remove(id_field);
                let mut entry = Map::new();
                entry.insert("where".into(), single(id_field, id));
                entry.insert("data".into(), Value::Object(m));
                push("update", Value::Object(entry));
            }
            op => push(op, single(id_field, id_of(rel, id_field, &m)?)),
        }
    }
    if grouped.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(grouped)))
    }
}

/// `include` entries for every singular relation, used when no explicit `select` is given.
pub fn singular_includes(model: &ModelDescriptor) -> Option<Map<String, Value>> {
    if model.relation_fields.singular.is_empty() {
        return None;
    }
    Some(
        model
            .relation_fields
            .singular
            .iter()
            .map(|r| (r.name.clone(), Value::Bool(true)))
            .collect(),
    )
}
