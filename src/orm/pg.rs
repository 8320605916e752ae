//! PostgreSQL backend: translates the ORM argument bag into parameterized SQL.
//! Tables are named after their model; columns after their fields.

use super::params::{cast_for, PgBindValue};
use super::{BatchOp, ModelDelegate, NestedOp, Orm, QueryOptions, RelationWrite, WritePlan};
use crate::error::AppError;
use crate::model::{ModelDescriptor, ModelKeys};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from model metadata).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    /// Push a parameter and return its placeholder, cast to `cast`.
    fn placeholder(&mut self, v: &Value, cast: &str) -> String {
        self.params.push(PgBindValue::from_json(v));
        format!("${}::{}", self.params.len(), cast)
    }
}

struct PgInner {
    pool: PgPool,
    schema: String,
    models: HashMap<String, ModelDescriptor>,
    keys: ModelKeys,
}

/// Delegates backed by one PostgreSQL schema.
#[derive(Clone)]
pub struct PgOrm {
    inner: Arc<PgInner>,
}

impl PgOrm {
    pub fn new(pool: PgPool, schema: impl Into<String>, models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let models: HashMap<String, ModelDescriptor> = models.into_iter().map(|m| (m.name.clone(), m)).collect();
        PgOrm {
            inner: Arc::new(PgInner {
                pool,
                schema: schema.into(),
                keys: ModelKeys::new(models.values()),
                models,
            }),
        }
    }
}

impl Orm for PgOrm {
    fn delegate(&self, model: &str) -> Option<Arc<dyn ModelDelegate>> {
        if !self.inner.models.contains_key(model) {
            return None;
        }
        Some(Arc::new(PgDelegate {
            inner: self.inner.clone(),
            model: model.to_string(),
        }))
    }
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Bool(false) | Value::Null)
}

fn eq_clause(field: &str, value: Value) -> Value {
    let mut m = Map::new();
    m.insert(field.to_string(), value);
    Value::Object(m)
}

fn operator_object(v: &Value) -> Option<&Map<String, Value>> {
    const OPERATORS: &[&str] = &[
        "equals", "not", "gt", "gte", "lt", "lte", "contains", "startsWith", "endsWith", "in", "notIn",
        "isEmpty", "mode",
    ];
    v.as_object()
        .filter(|m| !m.is_empty() && m.keys().all(|k| OPERATORS.contains(&k.as_str())))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn where_sql(model: &ModelDescriptor, clause: Option<&Value>, q: &mut QueryBuf) -> Result<String, AppError> {
    match clause {
        None | Some(Value::Null) => Ok("TRUE".into()),
        Some(Value::Object(m)) => {
            let mut parts = Vec::new();
            for (key, cond) in m {
                let part = match key.as_str() {
                    "AND" => join_clauses(model, cond, q, " AND ", "TRUE")?,
                    "OR" => join_clauses(model, cond, q, " OR ", "FALSE")?,
                    "NOT" => format!("NOT ({})", join_clauses(model, cond, q, " OR ", "FALSE")?),
                    field => field_sql(model, field, cond, q)?,
                };
                parts.push(part);
            }
            if parts.is_empty() {
                Ok("TRUE".into())
            } else {
                Ok(parts.join(" AND "))
            }
        }
        Some(other) => Err(AppError::BadRequest(format!("invalid where clause: {}", other))),
    }
}

fn join_clauses(
    model: &ModelDescriptor,
    cond: &Value,
    q: &mut QueryBuf,
    sep: &str,
    empty: &str,
) -> Result<String, AppError> {
    let items: Vec<&Value> = match cond {
        Value::Array(a) => a.iter().collect(),
        other => vec![other],
    };
    if items.is_empty() {
        return Ok(empty.to_string());
    }
    let mut parts = Vec::with_capacity(items.len());
    for c in items {
        parts.push(format!("({})", where_sql(model, Some(c), q)?));
    }
    Ok(parts.join(sep))
}

fn field_sql(model: &ModelDescriptor, field: &str, cond: &Value, q: &mut QueryBuf) -> Result<String, AppError> {
    let meta = model
        .field(field)
        .ok_or_else(|| AppError::BadRequest(format!("unknown filter field '{}' on {}", field, model.name)))?;
    let col = format!("{}.{}", MAIN_ALIAS, quoted(field));
    let cast = cast_for(meta.kind);
    if cond.is_null() {
        return Ok(format!("{} IS NULL", col));
    }
    let Some(ops) = operator_object(cond) else {
        return Ok(format!("{} = {}", col, q.placeholder(cond, cast)));
    };
    let insensitive = ops.get("mode").and_then(Value::as_str) == Some("insensitive");
    let mut parts = Vec::new();
    for (op, v) in ops {
        let part = match op.as_str() {
            "mode" => continue,
            "equals" if v.is_null() => format!("{} IS NULL", col),
            "equals" => format!("{} = {}", col, q.placeholder(v, cast)),
            "not" if v.is_null() => format!("{} IS NOT NULL", col),
            "not" if operator_object(v).is_some() => format!("NOT ({})", field_sql(model, field, v, q)?),
            "not" => format!("{} IS DISTINCT FROM {}", col, q.placeholder(v, cast)),
            "gt" => format!("{} > {}", col, q.placeholder(v, cast)),
            "gte" => format!("{} >= {}", col, q.placeholder(v, cast)),
            "lt" => format!("{} < {}", col, q.placeholder(v, cast)),
            "lte" => format!("{} <= {}", col, q.placeholder(v, cast)),
            "contains" | "startsWith" | "endsWith" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| AppError::BadRequest(format!("'{}' on {} expects a string", op, field)))?;
                let esc = escape_like(s);
                let pattern = match op.as_str() {
                    "contains" => format!("%{}%", esc),
                    "startsWith" => format!("{}%", esc),
                    _ => format!("%{}", esc),
                };
                let like = if insensitive { "ILIKE" } else { "LIKE" };
                format!("{}::text {} {}", col, like, q.placeholder(&Value::String(pattern), "text"))
            }
            "in" | "notIn" => {
                let items = v
                    .as_array()
                    .ok_or_else(|| AppError::BadRequest(format!("'{}' on {} expects a list", op, field)))?;
                if items.is_empty() {
                    if op == "in" { "FALSE".to_string() } else { "TRUE".to_string() }
                } else {
                    let phs: Vec<String> = items.iter().map(|i| q.placeholder(i, cast)).collect();
                    let kw = if op == "in" { "IN" } else { "NOT IN" };
                    format!("{} {} ({})", col, kw, phs.join(", "))
                }
            }
            "isEmpty" => {
                let empty = format!("({} IS NULL OR {}::text IN ('', '{{}}', '[]'))", col, col);
                if v.as_bool().unwrap_or(true) {
                    empty
                } else {
                    format!("NOT {}", empty)
                }
            }
            other => return Err(AppError::BadRequest(format!("unsupported operator '{}'", other))),
        };
        parts.push(part);
    }
    if parts.is_empty() {
        Ok("TRUE".into())
    } else {
        Ok(parts.join(" AND "))
    }
}

/// `LIMIT`/`OFFSET` take a `bigint`.
fn row_count(n: u64, key: &str) -> Result<i64, AppError> {
    i64::try_from(n).map_err(|_| AppError::BadRequest(format!("{} out of range", key)))
}

fn order_sql(model: &ModelDescriptor, order: &[Value]) -> Result<String, AppError> {
    let mut parts = Vec::new();
    for entry in order {
        let obj = entry
            .as_object()
            .ok_or_else(|| AppError::BadRequest("orderBy entries must be objects".into()))?;
        for (field, dir) in obj {
            if model.field(field).is_none() {
                return Err(AppError::BadRequest(format!("unknown sort field '{}'", field)));
            }
            let dir = match dir.as_str() {
                Some("asc") => "ASC",
                Some("desc") => "DESC",
                _ => return Err(AppError::BadRequest(format!("invalid sort direction for {}", field))),
            };
            parts.push(format!("{}.{} {}", MAIN_ALIAS, quoted(field), dir));
        }
    }
    Ok(parts.join(", "))
}

fn returning_list(model: &ModelDescriptor) -> String {
    model
        .fields
        .iter()
        .map(|f| format!("{}.{}", MAIN_ALIAS, quoted(&f.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl PgInner {
    fn model(&self, name: &str) -> Result<&ModelDescriptor, AppError> {
        self.models
            .get(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown model {}", name)))
    }

    fn table(&self, model: &ModelDescriptor) -> String {
        qualified_table(&self.schema, &model.name)
    }

    /// Scalar columns plus one scalar subquery per requested relation (row_to_json / json_agg).
    fn select_list(&self, model: &ModelDescriptor, options: &QueryOptions) -> Result<String, AppError> {
        let mut cols: Vec<&str> = Vec::new();
        let mut relations: Vec<&str> = Vec::new();
        match &options.select {
            Some(select) => {
                for (k, v) in select {
                    if !truthy(v) {
                        continue;
                    }
                    if model.relation(k).is_some() {
                        relations.push(k);
                    } else if model.field(k).is_some() {
                        cols.push(k);
                    } else {
                        return Err(AppError::BadRequest(format!("unknown field '{}' in select", k)));
                    }
                }
            }
            None => {
                cols = model.fields.iter().map(|f| f.name.as_str()).collect();
                if let Some(include) = &options.include {
                    for (k, v) in include {
                        if !truthy(v) {
                            continue;
                        }
                        if model.relation(k).is_none() {
                            return Err(AppError::BadRequest(format!("unknown relation '{}' in include", k)));
                        }
                        relations.push(k);
                    }
                }
            }
        }
        let mut parts: Vec<String> = cols
            .iter()
            .map(|c| format!("{}.{} AS {}", MAIN_ALIAS, quoted(c), quoted(c)))
            .collect();
        for name in relations {
            parts.push(format!("{} AS {}", self.relation_subquery(model, name)?, quoted(name)));
        }
        if parts.is_empty() {
            return Err(AppError::BadRequest("empty projection".into()));
        }
        Ok(parts.join(", "))
    }

    fn relation_subquery(&self, model: &ModelDescriptor, name: &str) -> Result<String, AppError> {
        let rel = model
            .relation(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown relation '{}'", name)))?;
        let target = self.model(&rel.target_type_name)?;
        let fk = rel
            .foreign_key_field
            .as_deref()
            .ok_or_else(|| AppError::BadRequest(format!("relation {} has no foreign key", name)))?;
        let table = self.table(target);
        Ok(if rel.is_array {
            format!(
                "(SELECT COALESCE(json_agg(row_to_json(sub)), '[]'::json) FROM (SELECT * FROM {} WHERE {} = {}.{}) sub)",
                table,
                quoted(fk),
                MAIN_ALIAS,
                quoted(model.id_field())
            )
        } else {
            format!(
                "(SELECT row_to_json(sub) FROM (SELECT * FROM {} WHERE {} = {}.{}) sub)",
                table,
                quoted(target.id_field()),
                MAIN_ALIAS,
                quoted(fk)
            )
        })
    }

    fn select_query(&self, model: &ModelDescriptor, options: &QueryOptions) -> Result<QueryBuf, AppError> {
        let mut q = QueryBuf::new();
        let cols = self.select_list(model, options)?;
        let where_ = where_sql(model, options.where_.as_ref(), &mut q)?;
        q.sql = format!("SELECT {} FROM {} {} WHERE {}", cols, self.table(model), MAIN_ALIAS, where_);
        if let Some(order) = &options.order_by {
            let ob = order_sql(model, order)?;
            if !ob.is_empty() {
                q.sql.push_str(&format!(" ORDER BY {}", ob));
            }
        }
        if let Some(take) = options.take {
            q.sql.push_str(&format!(" LIMIT {}", row_count(take, "take")?));
        }
        if let Some(skip) = options.skip {
            q.sql.push_str(&format!(" OFFSET {}", row_count(skip, "skip")?));
        }
        Ok(q)
    }

    fn set_list(&self, model: &ModelDescriptor, data: &Map<String, Value>, q: &mut QueryBuf) -> Result<String, AppError> {
        let mut sets = Vec::with_capacity(data.len());
        for (k, v) in data {
            let meta = model
                .field(k)
                .ok_or_else(|| AppError::BadRequest(format!("unknown field '{}' on {}", k, model.name)))?;
            sets.push(format!("{} = {}", quoted(k), q.placeholder(v, cast_for(meta.kind))));
        }
        Ok(sets.join(", "))
    }

    async fn insert_row(
        &self,
        conn: &mut PgConnection,
        model: &ModelDescriptor,
        data: &Map<String, Value>,
    ) -> Result<Value, AppError> {
        let mut q = QueryBuf::new();
        let mut cols = Vec::with_capacity(data.len());
        let mut phs = Vec::with_capacity(data.len());
        for (k, v) in data {
            let meta = model
                .field(k)
                .ok_or_else(|| AppError::BadRequest(format!("unknown field '{}' on {}", k, model.name)))?;
            cols.push(quoted(k));
            phs.push(q.placeholder(v, cast_for(meta.kind)));
        }
        let id = quoted(model.id_field());
        q.sql = if cols.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", self.table(model), id)
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                self.table(model),
                cols.join(", "),
                phs.join(", "),
                id
            )
        };
        let row = fetch_all(conn, &q)
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        Ok(row.get(model.id_field()).cloned().unwrap_or(Value::Null))
    }

    async fn update_where(
        &self,
        conn: &mut PgConnection,
        model: &ModelDescriptor,
        where_: &Value,
        data: &Map<String, Value>,
    ) -> Result<Vec<Value>, AppError> {
        if data.is_empty() {
            let mut opts = QueryOptions::default();
            opts.where_ = Some(where_.clone());
            return fetch_all(conn, &self.select_query(model, &opts)?).await;
        }
        let mut q = QueryBuf::new();
        let sets = self.set_list(model, data, &mut q)?;
        let cond = where_sql(model, Some(where_), &mut q)?;
        q.sql = format!(
            "UPDATE {} AS {} SET {} WHERE {} RETURNING {}",
            self.table(model),
            MAIN_ALIAS,
            sets,
            cond,
            returning_list(model)
        );
        fetch_all(conn, &q).await
    }

    async fn delete_where(
        &self,
        conn: &mut PgConnection,
        model: &ModelDescriptor,
        where_: &Value,
    ) -> Result<Vec<Value>, AppError> {
        let mut q = QueryBuf::new();
        let cond = where_sql(model, Some(where_), &mut q)?;
        q.sql = format!(
            "DELETE FROM {} AS {} WHERE {} RETURNING {}",
            self.table(model),
            MAIN_ALIAS,
            cond,
            returning_list(model)
        );
        fetch_all(conn, &q).await
    }

    fn insert_with_plan<'a>(
        &'a self,
        conn: &'a mut PgConnection,
        model: &'a ModelDescriptor,
        plan: WritePlan,
    ) -> BoxFuture<'a, Result<Value, AppError>> {
        Box::pin(async move {
            let mut scalars = plan.scalars;
            let (singular, list): (Vec<RelationWrite>, Vec<RelationWrite>) =
                plan.relations.into_iter().partition(|r| !r.relation.is_array);
            for rw in singular {
                self.apply_singular(&mut *conn, model, None, &mut scalars, rw).await?;
            }
            let id = self.insert_row(&mut *conn, model, &scalars).await?;
            for rw in list {
                self.apply_list(&mut *conn, &id, rw).await?;
            }
            Ok(id)
        })
    }

    async fn update_with_plan(
        &self,
        conn: &mut PgConnection,
        model: &ModelDescriptor,
        id: &Value,
        plan: WritePlan,
    ) -> Result<(), AppError> {
        let mut scalars = plan.scalars;
        let (singular, list): (Vec<RelationWrite>, Vec<RelationWrite>) =
            plan.relations.into_iter().partition(|r| !r.relation.is_array);
        let current = eq_clause(model.id_field(), id.clone());
        for rw in singular {
            let owner = self
                .update_where(&mut *conn, model, &current, &Map::new())
                .await?
                .into_iter()
                .next();
            self.apply_singular(&mut *conn, model, owner.as_ref(), &mut scalars, rw).await?;
        }
        if !scalars.is_empty() {
            self.update_where(&mut *conn, model, &current, &scalars).await?;
        }
        for rw in list {
            self.apply_list(&mut *conn, id, rw).await?;
        }
        Ok(())
    }

    /// Singular relations hold the foreign key on the owner row.
    async fn apply_singular(
        &self,
        conn: &mut PgConnection,
        owner_model: &ModelDescriptor,
        owner: Option<&Value>,
        scalars: &mut Map<String, Value>,
        rw: RelationWrite,
    ) -> Result<(), AppError> {
        let target = self.model(&rw.relation.target_type_name)?;
        let fk = rw.relation.foreign_key_field.clone().ok_or_else(|| {
            AppError::BadRequest(format!("relation {} has no foreign key on this side", rw.relation.name))
        })?;
        let current = owner.and_then(|o| o.get(&fk)).cloned().unwrap_or(Value::Null);
        for op in rw.ops {
            match op {
                NestedOp::Connect(id) => {
                    scalars.insert(fk.clone(), id);
                }
                NestedOp::Create(data) => {
                    let plan = WritePlan::from_data(target, &self.keys, data)?;
                    let child = self.insert_with_plan(&mut *conn, target, plan).await?;
                    scalars.insert(fk.clone(), child);
                }
                NestedOp::Disconnect(_) => {
                    scalars.insert(fk.clone(), Value::Null);
                }
                NestedOp::Update { data, .. } if owner.is_some() => {
                    if !current.is_null() {
                        let cond = eq_clause(target.id_field(), current.clone());
                        self.update_where(&mut *conn, target, &cond, &data).await?;
                    }
                }
                NestedOp::Delete(_) if owner.is_some() => {
                    scalars.insert(fk.clone(), Value::Null);
                    if let (false, Some(owner)) = (current.is_null(), owner) {
                        // Detach first so the owner's foreign key does not block the delete.
                        let owner_id = owner.get(owner_model.id_field()).cloned().unwrap_or(Value::Null);
                        let owner_cond = eq_clause(owner_model.id_field(), owner_id);
                        let mut detach = Map::new();
                        detach.insert(fk.clone(), Value::Null);
                        self.update_where(&mut *conn, owner_model, &owner_cond, &detach).await?;
                        let cond = eq_clause(target.id_field(), current.clone());
                        self.delete_where(&mut *conn, target, &cond).await?;
                    }
                }
                NestedOp::Update { .. } | NestedOp::Delete(_) => {
                    return Err(AppError::validation(rw.relation.name.clone(), "update/delete not allowed on create"));
                }
            }
        }
        Ok(())
    }

    /// List relations hold the foreign key on the target rows.
    async fn apply_list(&self, conn: &mut PgConnection, owner_id: &Value, rw: RelationWrite) -> Result<(), AppError> {
        let target = self.model(&rw.relation.target_type_name)?;
        let fk = rw.relation.foreign_key_field.clone().ok_or_else(|| {
            AppError::BadRequest(format!("relation {} has no back-reference field", rw.relation.name))
        })?;
        let target_id = target.id_field();
        let scoped = |id: Option<Value>| {
            let mut m = Map::new();
            if let Some(id) = id {
                m.insert(target_id.to_string(), id);
            }
            m.insert(fk.clone(), owner_id.clone());
            Value::Object(m)
        };
        for op in rw.ops {
            match op {
                NestedOp::Connect(id) => {
                    let mut set = Map::new();
                    set.insert(fk.clone(), owner_id.clone());
                    let hit = self
                        .update_where(&mut *conn, target, &eq_clause(target_id, id.clone()), &set)
                        .await?;
                    if hit.is_empty() {
                        return Err(AppError::NotFound(format!("{} with ID {} not found", target.name, id)));
                    }
                }
                NestedOp::Create(mut data) => {
                    data.insert(fk.clone(), owner_id.clone());
                    let plan = WritePlan::from_data(target, &self.keys, data)?;
                    self.insert_with_plan(&mut *conn, target, plan).await?;
                }
                NestedOp::Disconnect(id) => {
                    let mut set = Map::new();
                    set.insert(fk.clone(), Value::Null);
                    self.update_where(&mut *conn, target, &scoped(id), &set).await?;
                }
                NestedOp::Update { id, data } => {
                    self.update_where(&mut *conn, target, &scoped(id), &data).await?;
                }
                NestedOp::Delete(id) => {
                    self.delete_where(&mut *conn, target, &scoped(id)).await?;
                }
            }
        }
        Ok(())
    }
}

struct PgDelegate {
    inner: Arc<PgInner>,
    model: String,
}

impl PgDelegate {
    fn model(&self) -> Result<&ModelDescriptor, AppError> {
        self.inner.model(&self.model)
    }

    fn by_id(&self, model: &ModelDescriptor, id: Value, options: &QueryOptions) -> QueryOptions {
        let mut opts = options.clone();
        opts.where_ = Some(eq_clause(model.id_field(), id));
        opts.order_by = None;
        opts.skip = None;
        opts.take = Some(1);
        opts
    }

    async fn first_id(&self, conn: &mut PgConnection, model: &ModelDescriptor, where_: Option<&Value>) -> Result<Option<Value>, AppError> {
        let mut q = QueryBuf::new();
        let cond = where_sql(model, where_, &mut q)?;
        q.sql = format!(
            "SELECT {}.{} FROM {} {} WHERE {} LIMIT 1",
            MAIN_ALIAS,
            quoted(model.id_field()),
            self.inner.table(model),
            MAIN_ALIAS,
            cond
        );
        Ok(fetch_all(conn, &q)
            .await?
            .into_iter()
            .next()
            .and_then(|row| row.get(model.id_field()).cloned()))
    }
}

#[async_trait]
impl ModelDelegate for PgDelegate {
    async fn create(&self, data: Map<String, Value>, options: &QueryOptions) -> Result<Value, AppError> {
        let model = self.model()?;
        let plan = WritePlan::from_data(model, &self.inner.keys, data)?;
        let mut tx = self.inner.pool.begin().await?;
        let id = self.inner.insert_with_plan(&mut *tx, model, plan).await?;
        let q = self.inner.select_query(model, &self.by_id(model, id, options))?;
        let row = fetch_all(&mut *tx, &q)
            .await?
            .into_iter()
            .next()
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        tx.commit().await?;
        Ok(row)
    }

    async fn create_many(&self, data: Vec<Map<String, Value>>) -> Result<u64, AppError> {
        let model = self.model()?;
        let mut tx = self.inner.pool.begin().await?;
        let mut count = 0u64;
        for item in data {
            let plan = WritePlan::from_data(model, &self.inner.keys, item)?;
            self.inner.insert_with_plan(&mut *tx, model, plan).await?;
            count += 1;
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn find_many(&self, options: &QueryOptions) -> Result<Vec<Value>, AppError> {
        let model = self.model()?;
        let q = self.inner.select_query(model, options)?;
        let mut conn = self.inner.pool.acquire().await?;
        fetch_all(&mut *conn, &q).await
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
        let plan = WritePlan::from_data(model, &self.inner.keys, data)?;
        let mut tx = self.inner.pool.begin().await?;
        let Some(id) = self.first_id(&mut *tx, model, options.where_.as_ref()).await? else {
            return Ok(None);
        };
        self.inner.update_with_plan(&mut *tx, model, &id, plan).await?;
        let q = self.inner.select_query(model, &self.by_id(model, id, options))?;
        let row = fetch_all(&mut *tx, &q).await?.into_iter().next();
        tx.commit().await?;
        Ok(row)
    }

    async fn update_many(&self, where_: &Value, data: Map<String, Value>) -> Result<u64, AppError> {
        let model = self.model()?;
        let plan = WritePlan::from_data(model, &self.inner.keys, data)?;
        if !plan.relations.is_empty() {
            return Err(AppError::BadRequest("nested relation writes are not allowed in bulk updates".into()));
        }
        let mut conn = self.inner.pool.acquire().await?;
        Ok(self.inner.update_where(&mut *conn, model, where_, &plan.scalars).await?.len() as u64)
    }

    async fn delete(&self, options: &QueryOptions) -> Result<Option<Value>, AppError> {
        let model = self.model()?;
        let mut tx = self.inner.pool.begin().await?;
        let Some(id) = self.first_id(&mut *tx, model, options.where_.as_ref()).await? else {
            return Ok(None);
        };
        let q = self.inner.select_query(model, &self.by_id(model, id.clone(), options))?;
        let row = fetch_all(&mut *tx, &q).await?.into_iter().next();
        self.inner
            .delete_where(&mut *tx, model, &eq_clause(model.id_field(), id))
            .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn delete_many(&self, where_: &Value) -> Result<u64, AppError> {
        let model = self.model()?;
        let mut conn = self.inner.pool.acquire().await?;
        Ok(self.inner.delete_where(&mut *conn, model, where_).await?.len() as u64)
    }

    async fn count(&self, where_: Option<&Value>) -> Result<u64, AppError> {
        let model = self.model()?;
        let mut q = QueryBuf::new();
        let cond = where_sql(model, where_, &mut q)?;
        q.sql = format!("SELECT COUNT(*) FROM {} {} WHERE {}", self.inner.table(model), MAIN_ALIAS, cond);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(p.clone());
        }
        let mut conn = self.inner.pool.acquire().await?;
        let n = query.fetch_one(&mut *conn).await?;
        Ok(n.max(0) as u64)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Value>, AppError> {
        let model = self.model()?;
        let mut tx = self.inner.pool.begin().await?;
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            let rows = match op {
                BatchOp::Update { where_, data } => self.inner.update_where(&mut *tx, model, &where_, &data).await?,
                BatchOp::Delete { where_ } => self.inner.delete_where(&mut *tx, model, &where_).await?,
            };
            out.extend(rows);
        }
        tx.commit().await?;
        Ok(out)
    }
}

async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        let v = cell_to_value(row, name);
        map.insert(name.to_string(), v);
    }
    Value::Object(map)
}

fn cell_to_value(row: &sqlx::postgres::PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<serde_json::Value>, _>(name) {
        return j;
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldMeta, RelationField, RelationFields};
    use serde_json::json;

    fn user() -> ModelDescriptor {
        ModelDescriptor::new(
            "User",
            vec![
                FieldMeta { name: "id".into(), kind: FieldKind::Int, is_id: true },
                FieldMeta { name: "name".into(), kind: FieldKind::String, is_id: false },
                FieldMeta { name: "age".into(), kind: FieldKind::Int, is_id: false },
            ],
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
        )
    }

    #[test]
    fn where_sql_handles_operators_and_or() {
        let mut q = QueryBuf::new();
        let clause = json!({"OR": [{"name": {"contains": "a_b", "mode": "insensitive"}}, {"age": {"gte": 3}}]});
        let sql = where_sql(&user(), Some(&clause), &mut q).unwrap();
        assert_eq!(sql, "(main.\"name\"::text ILIKE $1::text) OR (main.\"age\" >= $2::int8)");
        assert_eq!(q.params, vec![PgBindValue::String("%a\\_b%".into()), PgBindValue::I64(3)]);
    }

    #[test]
    fn where_sql_rejects_unknown_fields() {
        let mut q = QueryBuf::new();
        let err = where_sql(&user(), Some(&json!({"bogus": 1})), &mut q).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let mut q = QueryBuf::new();
        let sql = where_sql(&user(), Some(&json!({"id": {"in": []}})), &mut q).unwrap();
        assert_eq!(sql, "FALSE");
        assert!(q.params.is_empty());
    }

    #[test]
    fn row_counts_beyond_bigint_are_a_bad_request() {
        assert_eq!(row_count(30, "take").unwrap(), 30);
        assert_eq!(row_count(i64::MAX as u64, "skip").unwrap(), i64::MAX);
        let err = row_count(u64::MAX, "skip").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "skip out of range"));
    }
}
