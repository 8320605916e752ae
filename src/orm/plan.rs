//! Decomposes ORM write data (scalars plus nested relation writes) into a plan backends execute.

use crate::error::AppError;
use crate::model::{ModelDescriptor, ModelKeys, RelationField};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum NestedOp {
    Connect(Value),
    Create(Map<String, Value>),
    /// Singular relations carry no id: the target is whatever the owner's foreign key points at.
    Update { id: Option<Value>, data: Map<String, Value> },
    Delete(Option<Value>),
    Disconnect(Option<Value>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationWrite {
    pub relation: RelationField,
    pub ops: Vec<NestedOp>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WritePlan {
    pub scalars: Map<String, Value>,
    pub relations: Vec<RelationWrite>,
}

impl WritePlan {
    /// Split `data` into scalar columns and nested relation operations.
    ///
    /// Singular: `{connect: {id}} | {create: {..}} | {update: {..}} | {delete: true} | {disconnect: true}`.
    /// List: `{connect: [{id}], create: [..], update: [{where: {id}, data}], delete: [{id}], disconnect: [{id}]}`.
    /// References are matched on the target model's id field, looked up in `keys`.
    pub fn from_data(model: &ModelDescriptor, keys: &ModelKeys, data: Map<String, Value>) -> Result<WritePlan, AppError> {
        let mut plan = WritePlan::default();
        for (key, value) in data {
            let Some(relation) = model.relation(&key) else {
                plan.scalars.insert(key, value);
                continue;
            };
            let ops = match value {
                Value::Object(m) => {
                    let target_id = keys.id_field_of(&relation.target_type_name);
                    if relation.is_array {
                        list_ops(target_id, relation, m)?
                    } else {
                        singular_ops(target_id, relation, m)?
                    }
                }
                Value::Null => continue,
                _ => {
                    return Err(AppError::validation(
                        key,
                        "relation writes must be an object of nested operations",
                    ))
                }
            };
            plan.relations.push(RelationWrite {
                relation: relation.clone(),
                ops,
            });
        }
        Ok(plan)
    }
}

fn singular_ops(
    target_id: &str,
    relation: &RelationField,
    m: Map<String, Value>,
) -> Result<Vec<NestedOp>, AppError> {
    let mut ops = Vec::new();
    for (op, v) in m {
        match (op.as_str(), v) {
            ("connect", Value::Object(target)) => ops.push(NestedOp::Connect(id_of(target_id, &relation.name, &target)?)),
            ("create", Value::Object(data)) => ops.push(NestedOp::Create(data)),
            ("update", Value::Object(data)) => ops.push(NestedOp::Update { id: None, data }),
            ("delete", Value::Bool(true)) => ops.push(NestedOp::Delete(None)),
            ("disconnect", Value::Bool(true)) => ops.push(NestedOp::Disconnect(None)),
            ("delete" | "disconnect", Value::Bool(false)) => {}
            (other, _) => {
                return Err(AppError::validation(
                    relation.name.clone(),
                    format!("unsupported nested operation '{}'", other),
                ))
            }
        }
    }
    Ok(ops)
}

fn list_ops(
    target_id: &str,
    relation: &RelationField,
    m: Map<String, Value>,
) -> Result<Vec<NestedOp>, AppError> {
    let mut ops = Vec::new();
    for (op, v) in m {
        let items = match v {
            Value::Array(items) => items,
            Value::Object(o) => vec![Value::Object(o)],
            _ => {
                return Err(AppError::validation(
                    relation.name.clone(),
                    format!("nested '{}' expects an object or array", op),
                ))
            }
        };
        for item in items {
            let Value::Object(item) = item else {
                return Err(AppError::validation(relation.name.clone(), "nested items must be objects"));
            };
            match op.as_str() {
                "connect" => ops.push(NestedOp::Connect(id_of(target_id, &relation.name, &item)?)),
                "create" => ops.push(NestedOp::Create(item)),
                "disconnect" => ops.push(NestedOp::Disconnect(Some(id_of(target_id, &relation.name, &item)?))),
                "delete" => ops.push(NestedOp::Delete(Some(id_of(target_id, &relation.name, &item)?))),
                "update" => {
                    let target = item
                        .get("where")
                        .and_then(Value::as_object)
                        .ok_or_else(|| AppError::validation(relation.name.clone(), "nested update needs 'where'"))?;
                    let id = id_of(target_id, &relation.name, target)?;
                    let data = item
                        .get("data")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    ops.push(NestedOp::Update { id: Some(id), data });
                }
                other => {
                    return Err(AppError::validation(
                        relation.name.clone(),
                        format!("unsupported nested operation '{}'", other),
                    ))
                }
            }
        }
    }
    Ok(ops)
}

fn id_of(id_field: &str, relation: &str, target: &Map<String, Value>) -> Result<Value, AppError> {
    target
        .get(id_field)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| AppError::validation(relation, format!("nested reference needs '{}'", id_field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldMeta, RelationFields};
    use serde_json::json;

    fn post() -> ModelDescriptor {
        ModelDescriptor::new(
            "Post",
            vec![
                FieldMeta { name: "id".into(), kind: FieldKind::Int, is_id: true },
                FieldMeta { name: "title".into(), kind: FieldKind::String, is_id: false },
                FieldMeta { name: "authorId".into(), kind: FieldKind::Int, is_id: false },
            ],
            RelationFields {
                singular: vec![RelationField {
                    name: "author".into(),
                    target_type_name: "User".into(),
                    foreign_key_field: Some("authorId".into()),
                    is_array: false,
                    is_optional: true,
                }],
                list: vec![RelationField {
                    name: "comments".into(),
                    target_type_name: "Comment".into(),
                    foreign_key_field: Some("postId".into()),
                    is_array: true,
                    is_optional: false,
                }],
            },
        )
    }

    fn keys() -> ModelKeys {
        let tag = ModelDescriptor::new(
            "Tag",
            vec![FieldMeta { name: "uuid".into(), kind: FieldKind::Uuid, is_id: true }],
            RelationFields::default(),
        );
        ModelKeys::new([&post(), &tag])
    }

    #[test]
    fn splits_scalars_and_relations() {
        let data = json!({
            "title": "hello",
            "author": {"connect": {"id": 3}},
            "comments": {"create": [{"body": "x"}], "delete": [{"id": 9}]}
        });
        let plan = WritePlan::from_data(&post(), &keys(), data.as_object().unwrap().clone()).unwrap();
        assert_eq!(plan.scalars.get("title"), Some(&json!("hello")));
        assert_eq!(plan.relations.len(), 2);
        let author = plan.relations.iter().find(|r| r.relation.name == "author").unwrap();
        assert_eq!(author.ops, vec![NestedOp::Connect(json!(3))]);
        let comments = plan.relations.iter().find(|r| r.relation.name == "comments").unwrap();
        assert_eq!(comments.ops.len(), 2);
    }

    #[test]
    fn references_use_the_target_id_field() {
        let mut post = post();
        post.relation_fields.list.push(RelationField {
            name: "tags".into(),
            target_type_name: "Tag".into(),
            foreign_key_field: Some("postId".into()),
            is_array: true,
            is_optional: false,
        });
        let u = "2b1f0c2e-8d7a-4a53-9b1e-1f8c7a0e4d11";
        let data = json!({"tags": {"connect": [{"uuid": u}], "disconnect": [{"id": 4}]}});
        let err = WritePlan::from_data(&post, &keys(), data.as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));

        let data = json!({"tags": {"connect": [{"uuid": u}]}});
        let plan = WritePlan::from_data(&post, &keys(), data.as_object().unwrap().clone()).unwrap();
        assert_eq!(plan.relations[0].ops, vec![NestedOp::Connect(json!(u))]);
    }

    #[test]
    fn connect_without_id_is_rejected() {
        let data = json!({"author": {"connect": {"name": "x"}}});
        let err = WritePlan::from_data(&post(), &keys(), data.as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));
    }
}
