//! Process-local ORM backend. Evaluates the same filter dialect as the PostgreSQL backend.

use super::{BatchOp, ModelDelegate, NestedOp, Orm, QueryOptions, RelationWrite, WritePlan};
use crate::error::AppError;
use crate::model::{FieldKind, ModelDescriptor, ModelKeys};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Row = Map<String, Value>;

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
}

struct MemoryStore {
    models: HashMap<String, ModelDescriptor>,
    keys: ModelKeys,
    tables: Mutex<Tables>,
}

/// In-memory store keyed by model name.
#[derive(Clone)]
pub struct MemoryOrm {
    inner: Arc<MemoryStore>,
}

impl MemoryOrm {
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let models: HashMap<String, ModelDescriptor> = models.into_iter().map(|m| (m.name.clone(), m)).collect();
        MemoryOrm {
            inner: Arc::new(MemoryStore {
                keys: ModelKeys::new(models.values()),
                models,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    /// Snapshot of every stored row of `model`, in insertion order.
    pub fn rows(&self, model: &str) -> Vec<Value> {
        match self.inner.tables.lock() {
            Ok(t) => t
                .rows
                .get(model)
                .map(|rows| rows.iter().cloned().map(Value::Object).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl Orm for MemoryOrm {
    fn delegate(&self, model: &str) -> Option<Arc<dyn ModelDelegate>> {
        if !self.inner.models.contains_key(model) {
            return None;
        }
        Some(Arc::new(MemoryDelegate {
            store: self.inner.clone(),
            model: model.to_string(),
        }))
    }
}

struct MemoryDelegate {
    store: Arc<MemoryStore>,
    model: String,
}

impl MemoryDelegate {
    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.store
            .tables
            .lock()
            .map_err(|_| AppError::BadRequest("state lock".into()))
    }

    fn model(&self) -> Result<&ModelDescriptor, AppError> {
        self.store
            .models
            .get(&self.model)
            .ok_or_else(|| AppError::BadRequest(format!("unknown model {}", self.model)))
    }

    fn ctx<'a>(&'a self, tables: &'a mut Tables) -> Ctx<'a> {
        Ctx {
            models: &self.store.models,
            keys: &self.store.keys,
            tables,
        }
    }
}

#[async_trait]
impl ModelDelegate for MemoryDelegate {
    async fn create(&self, data: Map<String, Value>, options: &QueryOptions) -> Result<Value, AppError> {
        let model = self.model()?;
        let plan = WritePlan::from_data(model, &self.store.keys, data)?;
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut ctx = self.ctx(&mut staged);
        let row = ctx.insert(model, plan)?;
        let out = ctx.project(model, &row, options)?;
        *guard = staged;
        Ok(out)
    }

    async fn create_many(&self, data: Vec<Map<String, Value>>) -> Result<u64, AppError> {
        let model = self.model()?;
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut ctx = self.ctx(&mut staged);
        let mut count = 0u64;
        for item in data {
            let plan = WritePlan::from_data(model, &self.store.keys, item)?;
            ctx.insert(model, plan)?;
            count += 1;
        }
        *guard = staged;
        Ok(count)
    }

    async fn find_many(&self, options: &QueryOptions) -> Result<Vec<Value>, AppError> {
        let model = self.model()?;
        let mut guard = self.lock()?;
        let ctx = self.ctx(&mut guard);
        let rows = ctx.select_rows(model, options)?;
        rows.iter().map(|r| ctx.project(model, r, options)).collect()
    }

    async fn find_first(&self, options: &QueryOptions) -> Result<Option<Value>, AppError> {
        let mut first = options.clone();
        first.take = Some(1);
        Ok(self.find_many(&first).await?.into_iter().next())
    }

    async fn find_unique(&self, options: &QueryOptions) -> Result<Option<Value>, AppError> {
        self.find_first(options).await
    }

    async fn update(&self, data: Map<String, Value>, options: &QueryOptions) -> Result<Option<Value>, AppError> {
        let model = self.model()?;
        let plan = WritePlan::from_data(model, &self.store.keys, data)?;
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut ctx = self.ctx(&mut staged);
        let Some(index) = ctx.first_index(model, options.where_.as_ref())? else {
            return Ok(None);
        };
        let row = ctx.update_at(model, index, plan)?;
        let out = ctx.project(model, &row, options)?;
        *guard = staged;
        Ok(Some(out))
    }

    async fn update_many(&self, where_: &Value, data: Map<String, Value>) -> Result<u64, AppError> {
        let model = self.model()?;
        let plan = WritePlan::from_data(model, &self.store.keys, data)?;
        if !plan.relations.is_empty() {
            return Err(AppError::BadRequest("nested relation writes are not allowed in bulk updates".into()));
        }
        let mut guard = self.lock()?;
        let mut ctx = self.ctx(&mut guard);
        Ok(ctx.update_matching(&self.model, Some(where_), &plan.scalars)?.len() as u64)
    }

    async fn delete(&self, options: &QueryOptions) -> Result<Option<Value>, AppError> {
        let model = self.model()?;
        let mut guard = self.lock()?;
        let mut ctx = self.ctx(&mut guard);
        let Some(index) = ctx.first_index(model, options.where_.as_ref())? else {
            return Ok(None);
        };
        let row = ctx.tables.rows.get(&self.model).map(|rows| rows[index].clone()).unwrap_or_default();
        let out = ctx.project(model, &row, options)?;
        if let Some(rows) = ctx.tables.rows.get_mut(&self.model) {
            rows.remove(index);
        }
        Ok(Some(out))
    }

    async fn delete_many(&self, where_: &Value) -> Result<u64, AppError> {
        let mut guard = self.lock()?;
        let mut ctx = self.ctx(&mut guard);
        Ok(ctx.delete_matching(&self.model, Some(where_))?.len() as u64)
    }

    async fn count(&self, where_: Option<&Value>) -> Result<u64, AppError> {
        let guard = self.lock()?;
        let rows = guard.rows.get(&self.model).map(Vec::as_slice).unwrap_or(&[]);
        let mut n = 0u64;
        for row in rows {
            if matches_where(row, where_)? {
                n += 1;
            }
        }
        Ok(n)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Value>, AppError> {
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut ctx = self.ctx(&mut staged);
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let affected = match op {
                BatchOp::Update { where_, data } => ctx.update_matching(&self.model, Some(&where_), &data)?,
                BatchOp::Delete { where_ } => ctx.delete_matching(&self.model, Some(&where_))?,
            };
            out.extend(affected.into_iter().map(Value::Object));
        }
        *guard = staged;
        Ok(out)
    }
}

/// Borrowed view used while one operation holds the lock.
struct Ctx<'a> {
    models: &'a HashMap<String, ModelDescriptor>,
    keys: &'a ModelKeys,
    tables: &'a mut Tables,
}

impl Ctx<'_> {
    fn target(&self, name: &str) -> Result<&ModelDescriptor, AppError> {
        self.models
            .get(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown related model {}", name)))
    }

    fn rows(&self, model: &str) -> &[Row] {
        self.tables.rows.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    fn first_index(&self, model: &ModelDescriptor, where_: Option<&Value>) -> Result<Option<usize>, AppError> {
        for (i, row) in self.rows(&model.name).iter().enumerate() {
            if matches_where(row, where_)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn select_rows(&self, model: &ModelDescriptor, options: &QueryOptions) -> Result<Vec<Row>, AppError> {
        let mut rows = Vec::new();
        for row in self.rows(&model.name) {
            if matches_where(row, options.where_.as_ref())? {
                rows.push(row.clone());
            }
        }
        if let Some(order) = &options.order_by {
            let keys = sort_keys(order)?;
            rows.sort_by(|a, b| {
                for (field, desc) in &keys {
                    let ord = compare(a.get(field), b.get(field));
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let take = options.take.map(|t| t as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }

    /// Apply `select`/`include` to one row, resolving relations one level deep.
    fn project(&self, model: &ModelDescriptor, row: &Row, options: &QueryOptions) -> Result<Value, AppError> {
        let mut out = Row::new();
        match &options.select {
            Some(select) => {
                for (key, wanted) in select {
                    if !truthy(wanted) {
                        continue;
                    }
                    if model.relation(key).is_some() {
                        out.insert(key.clone(), self.resolve_relation(model, row, key)?);
                    } else if let Some(v) = row.get(key) {
                        out.insert(key.clone(), v.clone());
                    }
                }
            }
            None => {
                out = row.clone();
                if let Some(include) = &options.include {
                    for (key, wanted) in include {
                        if truthy(wanted) && model.relation(key).is_some() {
                            out.insert(key.clone(), self.resolve_relation(model, row, key)?);
                        }
                    }
                }
            }
        }
        Ok(Value::Object(out))
    }

    fn resolve_relation(&self, model: &ModelDescriptor, row: &Row, name: &str) -> Result<Value, AppError> {
        let Some(relation) = model.relation(name) else {
            return Ok(Value::Null);
        };
        let target = self.target(&relation.target_type_name)?;
        let Some(fk) = relation.foreign_key_field.as_deref() else {
            return Ok(Value::Null);
        };
        if relation.is_array {
            let owner_id = row.get(model.id_field()).cloned().unwrap_or(Value::Null);
            let related = self
                .rows(&target.name)
                .iter()
                .filter(|r| r.get(fk).map(|v| loose_eq(v, &owner_id)).unwrap_or(false))
                .cloned()
                .map(Value::Object)
                .collect();
            Ok(Value::Array(related))
        } else {
            let Some(key) = row.get(fk).filter(|v| !v.is_null()) else {
                return Ok(Value::Null);
            };
            let id_field = target.id_field();
            Ok(self
                .rows(&target.name)
                .iter()
                .find(|r| r.get(id_field).map(|v| loose_eq(v, key)).unwrap_or(false))
                .cloned()
                .map(Value::Object)
                .unwrap_or(Value::Null))
        }
    }

    fn insert(&mut self, model: &ModelDescriptor, plan: WritePlan) -> Result<Row, AppError> {
        let mut row = plan.scalars;
        let (singular, list): (Vec<RelationWrite>, Vec<RelationWrite>) =
            plan.relations.into_iter().partition(|r| !r.relation.is_array);
        for rw in singular {
            self.apply_singular(&mut row, rw, true)?;
        }
        let id_field = model.id_field().to_string();
        let id = match row.get(&id_field).filter(|v| !v.is_null()) {
            Some(id) => {
                let id = id.clone();
                if self.rows(&model.name).iter().any(|r| r.get(&id_field).map(|v| loose_eq(v, &id)).unwrap_or(false)) {
                    return Err(AppError::Conflict(format!("{} with {} {} already exists", model.name, id_field, id)));
                }
                id
            }
            None => self.next_id(model),
        };
        row.insert(id_field, id.clone());
        self.tables.rows.entry(model.name.clone()).or_default().push(row.clone());
        for rw in list {
            self.apply_list(&id, rw)?;
        }
        Ok(row)
    }

    fn update_at(&mut self, model: &ModelDescriptor, index: usize, plan: WritePlan) -> Result<Row, AppError> {
        let mut row = self.rows(&model.name)[index].clone();
        for (k, v) in plan.scalars {
            row.insert(k, v);
        }
        let (singular, list): (Vec<RelationWrite>, Vec<RelationWrite>) =
            plan.relations.into_iter().partition(|r| !r.relation.is_array);
        for rw in singular {
            self.apply_singular(&mut row, rw, false)?;
        }
        if let Some(rows) = self.tables.rows.get_mut(&model.name) {
            rows[index] = row.clone();
        }
        let id = row.get(model.id_field()).cloned().unwrap_or(Value::Null);
        for rw in list {
            self.apply_list(&id, rw)?;
        }
        Ok(row)
    }

    /// Singular relations hold the foreign key on `row` itself.
    fn apply_singular(&mut self, row: &mut Row, rw: RelationWrite, creating: bool) -> Result<(), AppError> {
        let target = self.target(&rw.relation.target_type_name)?.clone();
        let fk = rw.relation.foreign_key_field.clone().ok_or_else(|| {
            AppError::BadRequest(format!("relation {} has no foreign key on this side", rw.relation.name))
        })?;
        let target_id = target.id_field().to_string();
        for op in rw.ops {
            match op {
                NestedOp::Connect(id) => {
                    if !self.rows(&target.name).iter().any(|r| r.get(&target_id).map(|v| loose_eq(v, &id)).unwrap_or(false)) {
                        return Err(AppError::NotFound(format!("{} with ID {} not found", target.name, id)));
                    }
                    row.insert(fk.clone(), id);
                }
                NestedOp::Create(data) => {
                    let child = self.insert(&target, WritePlan::from_data(&target, self.keys, data)?)?;
                    row.insert(fk.clone(), child.get(&target_id).cloned().unwrap_or(Value::Null));
                }
                NestedOp::Disconnect(_) => {
                    row.insert(fk.clone(), Value::Null);
                }
                NestedOp::Update { data, .. } if !creating => {
                    let current = row.get(&fk).cloned().unwrap_or(Value::Null);
                    self.update_matching(&target.name, Some(&eq_clause(&target_id, current)), &data)?;
                }
                NestedOp::Delete(_) if !creating => {
                    let current = row.get(&fk).cloned().unwrap_or(Value::Null);
                    self.delete_matching(&target.name, Some(&eq_clause(&target_id, current)))?;
                    row.insert(fk.clone(), Value::Null);
                }
                NestedOp::Update { .. } | NestedOp::Delete(_) => {
                    return Err(AppError::validation(rw.relation.name.clone(), "update/delete not allowed on create"));
                }
            }
        }
        Ok(())
    }

    /// List relations hold the foreign key on the target rows.
    fn apply_list(&mut self, owner_id: &Value, rw: RelationWrite) -> Result<(), AppError> {
        let target = self.target(&rw.relation.target_type_name)?.clone();
        let fk = rw.relation.foreign_key_field.clone().ok_or_else(|| {
            AppError::BadRequest(format!("relation {} has no back-reference field", rw.relation.name))
        })?;
        let target_id = target.id_field().to_string();
        for op in rw.ops {
            match op {
                NestedOp::Connect(id) => {
                    let mut set = Row::new();
                    set.insert(fk.clone(), owner_id.clone());
                    let hit = self.update_matching(&target.name, Some(&eq_clause(&target_id, id.clone())), &set)?;
                    if hit.is_empty() {
                        return Err(AppError::NotFound(format!("{} with ID {} not found", target.name, id)));
                    }
                }
                NestedOp::Create(mut data) => {
                    data.insert(fk.clone(), owner_id.clone());
                    self.insert(&target, WritePlan::from_data(&target, self.keys, data)?)?;
                }
                NestedOp::Disconnect(id) => {
                    let mut set = Row::new();
                    set.insert(fk.clone(), Value::Null);
                    self.update_matching(&target.name, Some(&scoped(&target_id, id, &fk, owner_id)), &set)?;
                }
                NestedOp::Update { id, data } => {
                    self.update_matching(&target.name, Some(&scoped(&target_id, id, &fk, owner_id)), &data)?;
                }
                NestedOp::Delete(id) => {
                    self.delete_matching(&target.name, Some(&scoped(&target_id, id, &fk, owner_id)))?;
                }
            }
        }
        Ok(())
    }

    fn update_matching(&mut self, model: &str, where_: Option<&Value>, set: &Row) -> Result<Vec<Row>, AppError> {
        let mut out = Vec::new();
        if let Some(rows) = self.tables.rows.get_mut(model) {
            for row in rows.iter_mut() {
                if matches_where(row, where_)? {
                    for (k, v) in set {
                        row.insert(k.clone(), v.clone());
                    }
                    out.push(row.clone());
                }
            }
        }
        Ok(out)
    }

    fn delete_matching(&mut self, model: &str, where_: Option<&Value>) -> Result<Vec<Row>, AppError> {
        let Some(rows) = self.tables.rows.get_mut(model) else {
            return Ok(Vec::new());
        };
        let mut kept = Vec::with_capacity(rows.len());
        let mut removed = Vec::new();
        for row in rows.drain(..) {
            if matches_where(&row, where_)? {
                removed.push(row);
            } else {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(removed)
    }

    fn next_id(&mut self, model: &ModelDescriptor) -> Value {
        let kind = model.field(model.id_field()).map(|f| f.kind).unwrap_or(FieldKind::Int);
        match kind {
            FieldKind::Int => {
                let next = self.tables.next_id.entry(model.name.clone()).or_insert(0);
                *next += 1;
                Value::Number((*next).into())
            }
            _ => Value::String(uuid::Uuid::new_v4().to_string()),
        }
    }
}

fn eq_clause(field: &str, value: Value) -> Value {
    let mut m = Row::new();
    m.insert(field.to_string(), value);
    Value::Object(m)
}

fn scoped(id_field: &str, id: Option<Value>, fk: &str, owner_id: &Value) -> Value {
    let mut m = Row::new();
    if let Some(id) = id {
        m.insert(id_field.to_string(), id);
    }
    m.insert(fk.to_string(), owner_id.clone());
    Value::Object(m)
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Bool(false) | Value::Null)
}

fn sort_keys(order: &[Value]) -> Result<Vec<(String, bool)>, AppError> {
    let mut keys = Vec::new();
    for entry in order {
        let Some(obj) = entry.as_object() else {
            return Err(AppError::BadRequest("orderBy entries must be objects".into()));
        };
        for (field, dir) in obj {
            let desc = match dir.as_str() {
                Some("desc") => true,
                Some("asc") => false,
                _ => return Err(AppError::BadRequest(format!("invalid sort direction for {}", field))),
            };
            keys.push((field.clone(), desc));
        }
    }
    Ok(keys)
}

const OPERATORS: &[&str] = &[
    "equals", "not", "gt", "gte", "lt", "lte", "contains", "startsWith", "endsWith", "in", "notIn", "isEmpty",
    "mode",
];

fn is_operator_object(v: &Value) -> bool {
    match v.as_object() {
        Some(m) => !m.is_empty() && m.keys().all(|k| OPERATORS.contains(&k.as_str())),
        None => false,
    }
}

fn matches_where(row: &Row, where_: Option<&Value>) -> Result<bool, AppError> {
    match where_ {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Object(clause)) => {
            for (key, cond) in clause {
                let ok = match key.as_str() {
                    "AND" => {
                        let mut all = true;
                        for c in as_list(cond) {
                            all &= matches_where(row, Some(c))?;
                        }
                        all
                    }
                    "OR" => {
                        let mut any = false;
                        for c in as_list(cond) {
                            any |= matches_where(row, Some(c))?;
                        }
                        any
                    }
                    "NOT" => {
                        let mut none = true;
                        for c in as_list(cond) {
                            none &= !matches_where(row, Some(c))?;
                        }
                        none
                    }
                    field => field_matches(row.get(field), cond)?,
                };
                if !ok {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Some(other) => Err(AppError::BadRequest(format!("invalid where clause: {}", other))),
    }
}

fn as_list(v: &Value) -> Vec<&Value> {
    match v {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn field_matches(actual: Option<&Value>, cond: &Value) -> Result<bool, AppError> {
    let actual = actual.unwrap_or(&Value::Null);
    if !is_operator_object(cond) {
        return Ok(loose_eq(actual, cond));
    }
    let ops = cond.as_object().map(|m| m.clone()).unwrap_or_default();
    let insensitive = ops.get("mode").and_then(Value::as_str) == Some("insensitive");
    for (op, expected) in &ops {
        let ok = match op.as_str() {
            "mode" => true,
            "equals" => loose_eq(actual, expected),
            "not" => {
                if is_operator_object(expected) {
                    !field_matches(Some(actual), expected)?
                } else {
                    !loose_eq(actual, expected)
                }
            }
            "gt" => !actual.is_null() && compare(Some(actual), Some(expected)) == Ordering::Greater,
            "gte" => !actual.is_null() && compare(Some(actual), Some(expected)) != Ordering::Less,
            "lt" => !actual.is_null() && compare(Some(actual), Some(expected)) == Ordering::Less,
            "lte" => !actual.is_null() && compare(Some(actual), Some(expected)) != Ordering::Greater,
            "contains" | "startsWith" | "endsWith" => {
                let (Some(hay), Some(needle)) = (actual.as_str(), expected.as_str()) else {
                    return Ok(false);
                };
                let (hay, needle) = if insensitive {
                    (hay.to_lowercase(), needle.to_lowercase())
                } else {
                    (hay.to_string(), needle.to_string())
                };
                match op.as_str() {
                    "contains" => hay.contains(&needle),
                    "startsWith" => hay.starts_with(&needle),
                    _ => hay.ends_with(&needle),
                }
            }
            "in" => as_list(expected).iter().any(|e| loose_eq(actual, e)),
            "notIn" => !as_list(expected).iter().any(|e| loose_eq(actual, e)),
            "isEmpty" => {
                let empty = match actual {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    Value::Array(a) => a.is_empty(),
                    _ => false,
                };
                empty == expected.as_bool().unwrap_or(true)
            }
            _ => false,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(n), Value::Number(m)) => n
            .as_f64()
            .partial_cmp(&m.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(s), Value::String(t)) => s.cmp(t),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldMeta, RelationField, RelationFields};
    use serde_json::json;

    fn models() -> Vec<ModelDescriptor> {
        let int = |n: &str, id: bool| FieldMeta { name: n.into(), kind: FieldKind::Int, is_id: id };
        let s = |n: &str| FieldMeta { name: n.into(), kind: FieldKind::String, is_id: false };
        vec![
            ModelDescriptor::new(
                "User",
                vec![int("id", true), s("name")],
                RelationFields {
                    singular: vec![],
                    list: vec![RelationField {
                        name: "posts".into(),
                        target_type_name: "Post".into(),
                        foreign_key_field: Some("authorId".into()),
                        is_array: true,
                        is_optional: false,
                    }],
                },
            ),
            ModelDescriptor::new(
                "Post",
                vec![int("id", true), s("title"), int("authorId", false)],
                RelationFields {
                    singular: vec![RelationField {
                        name: "author".into(),
                        target_type_name: "User".into(),
                        foreign_key_field: Some("authorId".into()),
                        is_array: false,
                        is_optional: true,
                    }],
                    list: vec![],
                },
            ),
        ]
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn create_assigns_ids_and_resolves_includes() {
        let orm = MemoryOrm::new(models());
        let users = orm.delegate("User").unwrap();
        let posts = orm.delegate("Post").unwrap();
        let user = users.create(obj(json!({"name": "Ann"})), &QueryOptions::default()).await.unwrap();
        assert_eq!(user["id"], json!(1));

        let include: QueryOptions = serde_json::from_value(json!({"include": {"author": true}})).unwrap();
        let post = posts
            .create(obj(json!({"title": "t", "author": {"connect": {"id": 1}}})), &include)
            .await
            .unwrap();
        assert_eq!(post["authorId"], json!(1));
        assert_eq!(post["author"]["name"], json!("Ann"));
    }

    #[tokio::test]
    async fn nested_list_create_stamps_back_reference() {
        let orm = MemoryOrm::new(models());
        let users = orm.delegate("User").unwrap();
        users
            .create(obj(json!({"name": "Ann", "posts": {"create": [{"title": "a"}, {"title": "b"}]}})), &QueryOptions::default())
            .await
            .unwrap();
        let rows = orm.rows("Post");
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["authorId"] == json!(1)));
    }

    #[tokio::test]
    async fn filter_sort_and_page() {
        let orm = MemoryOrm::new(models());
        let users = orm.delegate("User").unwrap();
        for name in ["Cid", "ann", "Bob"] {
            users.create(obj(json!({"name": name})), &QueryOptions::default()).await.unwrap();
        }
        let opts: QueryOptions = serde_json::from_value(json!({
            "where": {"OR": [{"name": {"contains": "A", "mode": "insensitive"}}, {"name": "Bob"}]},
            "orderBy": [{"name": "desc"}],
            "skip": 0,
            "take": 5
        }))
        .unwrap();
        let found = users.find_many(&opts).await.unwrap();
        let names: Vec<_> = found.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("ann"), json!("Bob")]);
        assert_eq!(users.count(Some(&json!({"id": {"gt": 1}}))).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let orm = MemoryOrm::new(models());
        let users = orm.delegate("User").unwrap();
        users.create(obj(json!({"name": "Ann"})), &QueryOptions::default()).await.unwrap();
        let err = users
            .batch(vec![
                BatchOp::Update { where_: json!({"id": 1}), data: obj(json!({"name": "Zed"})) },
                BatchOp::Delete { where_: json!("bad") },
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(orm.rows("User")[0]["name"], json!("Ann"));
    }
}
