//! Generic CRUD service: one instance per model, dispatching to that model's ORM delegate.

use super::relations::{normalize_relations, singular_includes, WriteKind};
use crate::auth::Principal;
use crate::error::AppError;
use crate::model::{ModelDescriptor, ModelKeys};
use crate::orm::{BatchOp, ModelDelegate, QueryOptions};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Caller identity handed to every call for audit and authorization hooks. Not interpreted here.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceContext {
    pub user: Option<Principal>,
    pub access_token: Option<String>,
}

#[derive(Clone)]
pub struct CrudService {
    model: Arc<ModelDescriptor>,
    delegate: Arc<dyn ModelDelegate>,
    keys: Arc<ModelKeys>,
}

fn body_object(body: Value) -> Result<Map<String, Value>, AppError> {
    match body {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::validation("body", "must be a JSON object")),
    }
}

fn require_filter(filters: &Value) -> Result<(), AppError> {
    if filters.is_object() {
        Ok(())
    } else {
        Err(AppError::BadRequest("filters must be an object".into()))
    }
}

impl CrudService {
    /// `keys` indexes every model this one can reference through a relation.
    pub fn new(model: Arc<ModelDescriptor>, delegate: Arc<dyn ModelDelegate>, keys: Arc<ModelKeys>) -> Self {
        CrudService { model, delegate, keys }
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    pub fn descriptor(&self) -> Arc<ModelDescriptor> {
        self.model.clone()
    }

    /// Singular relations are included unless the caller selected fields explicitly.
    fn read_options(&self, options: QueryOptions) -> QueryOptions {
        let options = match (options.select.is_none(), singular_includes(&self.model)) {
            (true, Some(include)) => QueryOptions {
                include: Some(include),
                ..QueryOptions::default()
            }
            .layer(options),
            _ => options,
        };
        options.finalize_projection()
    }

    /// Exactly `{id}` with a real id value: an indexed lookup is possible.
    fn is_unique_filter(&self, filters: &Map<String, Value>) -> bool {
        filters.len() == 1
            && filters
                .get(self.model.id_field())
                .map(|v| !v.is_null() && v.as_str() != Some("me"))
                .unwrap_or(false)
    }

    fn trace(&self, op: &str, ctx: &ServiceContext) {
        tracing::debug!(
            model = %self.model.name,
            op,
            user = ?ctx.user.as_ref().map(|p| &p.id),
            "service call"
        );
    }

    pub async fn create_one(&self, body: Value, options: QueryOptions, ctx: &ServiceContext) -> Result<Value, AppError> {
        self.trace("create_one", ctx);
        let data = normalize_relations(&self.model, &self.keys, body_object(body)?, WriteKind::Create)?;
        self.delegate.create(data, &self.read_options(options)).await
    }

    pub async fn create_many(&self, body: Value, ctx: &ServiceContext) -> Result<u64, AppError> {
        self.trace("create_many", ctx);
        let items = match body {
            Value::Array(items) if !items.is_empty() => items,
            _ => {
                return Err(AppError::MissingArrayRequestBody(
                    "request body must be a non-empty array".into(),
                ))
            }
        };
        let mut data = Vec::with_capacity(items.len());
        for item in items {
            data.push(normalize_relations(&self.model, &self.keys, body_object(item)?, WriteKind::Create)?);
        }
        self.delegate.create_many(data).await
    }

    pub async fn find_many(
        &self,
        filters: Option<Value>,
        options: QueryOptions,
        ctx: &ServiceContext,
    ) -> Result<Vec<Value>, AppError> {
        self.trace("find_many", ctx);
        let mut options = self.read_options(options);
        if let Some(f) = filters {
            options.and_where(f);
        }
        self.delegate.find_many(&options).await
    }

    pub async fn find_one(
        &self,
        filters: &Map<String, Value>,
        options: QueryOptions,
        ctx: &ServiceContext,
    ) -> Result<Option<Value>, AppError> {
        self.trace("find_one", ctx);
        let options = self
            .read_options(options)
            .with_where(Value::Object(filters.clone()));
        if self.is_unique_filter(filters) {
            self.delegate.find_unique(&options).await
        } else {
            self.delegate.find_first(&options).await
        }
    }

    /// Non-unique filters resolve to one record id first; the update then targets that id.
    pub async fn update_one(
        &self,
        filters: &Map<String, Value>,
        body: Value,
        options: QueryOptions,
        ctx: &ServiceContext,
    ) -> Result<Option<Value>, AppError> {
        self.trace("update_one", ctx);
        let data = normalize_relations(&self.model, &self.keys, body_object(body)?, WriteKind::Update)?;
        let Some(target) = self.resolve_target(filters, &options).await? else {
            return Ok(None);
        };
        let options = self.read_options(options);
        let options = QueryOptions {
            where_: Some(target),
            ..options
        };
        self.delegate.update(data, &options).await
    }

    pub async fn update_many(&self, filters: &Value, body: Value, ctx: &ServiceContext) -> Result<u64, AppError> {
        self.trace("update_many", ctx);
        require_filter(filters)?;
        let data = body_object(body)?;
        self.delegate.update_many(filters, data).await
    }

    pub async fn delete_one(
        &self,
        filters: &Map<String, Value>,
        options: QueryOptions,
        ctx: &ServiceContext,
    ) -> Result<Option<Value>, AppError> {
        self.trace("delete_one", ctx);
        if filters.is_empty() {
            return Err(AppError::BadRequest("filters must not be empty".into()));
        }
        let Some(target) = self.resolve_target(filters, &options).await? else {
            return Ok(None);
        };
        let options = QueryOptions {
            where_: Some(target),
            ..self.read_options(options)
        };
        self.delegate.delete(&options).await
    }

    pub async fn delete_many(&self, filters: &Value, ctx: &ServiceContext) -> Result<u64, AppError> {
        self.trace("delete_many", ctx);
        require_filter(filters)?;
        self.delegate.delete_many(filters).await
    }

    /// Each entry is `{id, ..data}`; its id is ANDed with the outer filter.
    pub async fn batch_update(
        &self,
        entries: Value,
        filters: Option<Value>,
        ctx: &ServiceContext,
    ) -> Result<Vec<Value>, AppError> {
        self.trace("batch_update", ctx);
        let id_field = self.model.id_field().to_string();
        let mut ops = Vec::new();
        for (i, entry) in batch_entries(entries)?.into_iter().enumerate() {
            let mut data = body_object(entry).map_err(|_| AppError::validation(format!("[{}]", i), "must be an object"))?;
            let id = data
                .remove(&id_field)
                .filter(|v| !v.is_null())
                .ok_or_else(|| AppError::validation(format!("[{}].{}", i, id_field), "is required"))?;
            ops.push(BatchOp::Update {
                where_: self.entry_filter(&id_field, id, filters.as_ref()),
                data,
            });
        }
        self.delegate.batch(ops).await
    }

    /// Entries are `{id}` objects or bare ids.
    pub async fn batch_delete(
        &self,
        entries: Value,
        filters: Option<Value>,
        ctx: &ServiceContext,
    ) -> Result<Vec<Value>, AppError> {
        self.trace("batch_delete", ctx);
        let id_field = self.model.id_field().to_string();
        let mut ops = Vec::new();
        for (i, entry) in batch_entries(entries)?.into_iter().enumerate() {
            let id = match entry {
                Value::Object(mut m) => m.remove(&id_field).filter(|v| !v.is_null()),
                Value::Null | Value::Array(_) => None,
                id => Some(id),
            }
            .ok_or_else(|| AppError::validation(format!("[{}].{}", i, id_field), "is required"))?;
            ops.push(BatchOp::Delete {
                where_: self.entry_filter(&id_field, id, filters.as_ref()),
            });
        }
        self.delegate.batch(ops).await
    }

    pub async fn count(&self, filters: Option<&Value>, ctx: &ServiceContext) -> Result<u64, AppError> {
        self.trace("count", ctx);
        self.delegate.count(filters).await
    }

    fn entry_filter(&self, id_field: &str, id: Value, outer: Option<&Value>) -> Value {
        let mut by_id = Map::new();
        by_id.insert(id_field.to_string(), id);
        QueryOptions::default()
            .with_where(outer.cloned().unwrap_or(Value::Null))
            .with_where(Value::Object(by_id))
            .where_or_empty()
    }

    /// `{id}` filters are used as-is; anything else is resolved to the first match's id.
    async fn resolve_target(
        &self,
        filters: &Map<String, Value>,
        options: &QueryOptions,
    ) -> Result<Option<Value>, AppError> {
        let id_field = self.model.id_field();
        if self.is_unique_filter(filters) {
            let mut scoped = QueryOptions::default().with_where(Value::Object(filters.clone()));
            if let Some(w) = &options.where_ {
                scoped.and_where(w.clone());
            }
            return Ok(scoped.where_);
        }
        let mut select = Map::new();
        select.insert(id_field.to_string(), Value::Bool(true));
        let lookup = QueryOptions {
            select: Some(select),
            ..QueryOptions::default()
        }
        .with_where(options.where_.clone().unwrap_or(Value::Null))
        .with_where(Value::Object(filters.clone()));
        let found = self.delegate.find_first(&lookup).await?;
        Ok(found.and_then(|row| row.get(id_field).cloned()).map(|id| {
            let mut m = Map::new();
            m.insert(id_field.to_string(), id);
            Value::Object(m)
        }))
    }
}

fn batch_entries(entries: Value) -> Result<Vec<Value>, AppError> {
    match entries {
        Value::Array(items) if !items.is_empty() => Ok(items),
        _ => Err(AppError::MissingArrayRequestBody(
            "request body must be a non-empty array".into(),
        )),
    }
}
