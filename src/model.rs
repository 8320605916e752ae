//! Model metadata fed in by schema introspection: names, scalar fields and relations.

use crate::case::{pluralize, to_kebab_case};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Scalar field type, used for query-string coercion and search-field discovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Uuid,
    DateTime,
    Json,
}

impl FieldKind {
    /// Convert a raw query/path string into a typed JSON value for this kind.
    /// Falls back to a string when the text does not parse.
    pub fn coerce(&self, s: &str) -> Value {
        match self {
            FieldKind::Int => {
                if let Ok(n) = s.parse::<i64>() {
                    return Value::Number(n.into());
                }
            }
            FieldKind::Float => {
                if let Some(n) = s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                    return Value::Number(n);
                }
            }
            FieldKind::Bool => {
                if s.eq_ignore_ascii_case("true") {
                    return Value::Bool(true);
                }
                if s.eq_ignore_ascii_case("false") {
                    return Value::Bool(false);
                }
            }
            FieldKind::Uuid => {
                if let Ok(u) = uuid::Uuid::parse_str(s) {
                    return Value::String(u.to_string());
                }
            }
            FieldKind::Json => {
                if let Ok(v) = serde_json::from_str::<Value>(s) {
                    return v;
                }
            }
            FieldKind::String | FieldKind::DateTime => {}
        }
        Value::String(s.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMeta {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub is_id: bool,
}

/// A relation from one model to another.
///
/// For singular relations `foreign_key_field` names the scalar on this model;
/// for list relations it names the scalar on the target model pointing back here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationField {
    pub name: String,
    pub target_type_name: String,
    #[serde(default)]
    pub foreign_key_field: Option<String>,
    #[serde(default)]
    pub is_array: bool,
    #[serde(default)]
    pub is_optional: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationFields {
    #[serde(default)]
    pub singular: Vec<RelationField>,
    #[serde(default)]
    pub list: Vec<RelationField>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    pub kebab_name: String,
    pub plural_route_name: String,
    pub fields: Vec<FieldMeta>,
    pub relation_fields: RelationFields,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldMeta>, relation_fields: RelationFields) -> Self {
        let name = name.into();
        let kebab_name = to_kebab_case(&name);
        let plural_route_name = pluralize(&kebab_name);
        ModelDescriptor {
            name,
            kebab_name,
            plural_route_name,
            fields,
            relation_fields,
        }
    }

    pub fn id_field(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.is_id)
            .map(|f| f.name.as_str())
            .unwrap_or("id")
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationField> {
        self.relation_fields
            .singular
            .iter()
            .chain(self.relation_fields.list.iter())
            .find(|r| r.name == name)
    }

    /// Coerce a raw string for a scalar field; unknown fields stay strings.
    pub fn coerce(&self, field: &str, raw: &str) -> Value {
        match self.field(field) {
            Some(meta) => meta.kind.coerce(raw),
            None => Value::String(raw.to_string()),
        }
    }

    /// String fields eligible for full-text search: every string-typed, non-identifier field.
    pub fn search_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::String && !f.is_id)
    }
}

/// Primary-key field names by model name. Nested relation references are keyed by the
/// target model's id field, which need not match the owner's.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelKeys(HashMap<String, String>);

impl ModelKeys {
    pub fn new<'a>(models: impl IntoIterator<Item = &'a ModelDescriptor>) -> Self {
        ModelKeys(
            models
                .into_iter()
                .map(|m| (m.name.clone(), m.id_field().to_string()))
                .collect(),
        )
    }

    /// Id field of `model`; `id` for models outside the index.
    pub fn id_field_of(&self, model: &str) -> &str {
        self.0.get(model).map(String::as_str).unwrap_or("id")
    }
}

/// Source of the discovered model list and relation metadata.
pub trait ModelProvider: Send + Sync {
    fn list_models(&self) -> Vec<String>;

    fn describe(&self, name: &str) -> Option<ModelDescriptor>;
}

/// Raw schema document entry, as produced by schema introspection.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaModel {
    pub name: String,
    pub fields: Vec<FieldMeta>,
    #[serde(default)]
    pub relations: Vec<RelationField>,
}

/// In-memory model list, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct StaticModelProvider {
    models: Vec<ModelDescriptor>,
}

impl StaticModelProvider {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        StaticModelProvider { models }
    }

    /// Build from a JSON array of `SchemaModel`; relations are split by `isArray`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<SchemaModel> =
            serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("schema: {}", e)))?;
        let mut seen = HashSet::new();
        let mut models = Vec::with_capacity(raw.len());
        for m in raw {
            if !seen.insert(m.name.clone()) {
                return Err(ConfigError::DuplicateResource(m.name));
            }
            let (list, singular): (Vec<_>, Vec<_>) = m.relations.into_iter().partition(|r| r.is_array);
            models.push(ModelDescriptor::new(m.name, m.fields, RelationFields { singular, list }));
        }
        Ok(StaticModelProvider { models })
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }
}

impl ModelProvider for StaticModelProvider {
    fn list_models(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    fn describe(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.iter().find(|m| m.name == name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"[
        {"name": "User", "fields": [
            {"name": "id", "kind": "int", "isId": true},
            {"name": "name", "kind": "string"},
            {"name": "active", "kind": "bool"}
        ], "relations": [
            {"name": "posts", "targetTypeName": "Post", "foreignKeyField": "authorId", "isArray": true}
        ]},
        {"name": "BlogPost", "fields": [{"name": "id", "kind": "uuid", "isId": true}]}
    ]"#;

    #[test]
    fn from_json_derives_names_and_splits_relations() {
        let provider = StaticModelProvider::from_json(SCHEMA).unwrap();
        assert_eq!(provider.list_models(), vec!["User", "BlogPost"]);
        let user = provider.describe("User").unwrap();
        assert_eq!(user.kebab_name, "user");
        assert_eq!(user.plural_route_name, "users");
        assert_eq!(user.relation_fields.list.len(), 1);
        assert!(user.relation_fields.singular.is_empty());
        assert_eq!(provider.describe("BlogPost").unwrap().plural_route_name, "blog-posts");
    }

    #[test]
    fn coerce_uses_field_kind() {
        let provider = StaticModelProvider::from_json(SCHEMA).unwrap();
        let user = provider.describe("User").unwrap();
        assert_eq!(user.coerce("id", "42"), serde_json::json!(42));
        assert_eq!(user.coerce("active", "TRUE"), serde_json::json!(true));
        assert_eq!(user.coerce("name", "42"), serde_json::json!("42"));
        assert_eq!(user.coerce("id", "me"), serde_json::json!("me"));
    }

    #[test]
    fn duplicate_models_rejected() {
        let err = StaticModelProvider::from_json(r#"[{"name":"A","fields":[]},{"name":"A","fields":[]}]"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateResource(_)));
    }
}
