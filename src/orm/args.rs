//! ORM argument bag (`where`, `select`, `include`, `orderBy`, `skip`, `take`) and its merge rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prisma-shaped query options.
///
/// Layering (`QueryOptions::layer`) is the only merge used anywhere:
/// `where` clauses are AND-combined, `select`/`include`/`extra` merge per key with the
/// upper layer winning, and `orderBy`/`skip`/`take` are replaced when the upper layer sets them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Map<String, Value>>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryOptions {
    pub fn with_where(mut self, clause: Value) -> Self {
        self.and_where(clause);
        self
    }

    /// AND a clause into `where`. Empty objects are ignored.
    pub fn and_where(&mut self, clause: Value) {
        if is_empty_clause(&clause) {
            return;
        }
        self.where_ = Some(match self.where_.take() {
            None => clause,
            Some(existing) if is_empty_clause(&existing) => clause,
            Some(existing) => serde_json::json!({ "AND": [existing, clause] }),
        });
    }

    /// Lay `over` on top of `self`; see the type docs for the per-key rules.
    pub fn layer(mut self, over: QueryOptions) -> QueryOptions {
        if let Some(w) = over.where_ {
            self.and_where(w);
        }
        self.select = merge_maps(self.select, over.select);
        self.include = merge_maps(self.include, over.include);
        if over.order_by.as_ref().map(|o| !o.is_empty()).unwrap_or(false) {
            self.order_by = over.order_by;
        }
        if over.skip.is_some() {
            self.skip = over.skip;
        }
        if over.take.is_some() {
            self.take = over.take;
        }
        for (k, v) in over.extra {
            self.extra.insert(k, v);
        }
        self
    }

    /// Enforce `select` XOR `include`: an explicit select wins and include is dropped.
    pub fn finalize_projection(mut self) -> Self {
        if self.select.is_some() {
            self.include = None;
        }
        self
    }

    pub fn where_or_empty(&self) -> Value {
        self.where_.clone().unwrap_or_else(|| Value::Object(Map::new()))
    }

    pub fn is_empty(&self) -> bool {
        *self == QueryOptions::default()
    }
}

fn merge_maps(
    base: Option<Map<String, Value>>,
    over: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (base, over) {
        (None, o) => o,
        (b, None) => b,
        (Some(mut b), Some(o)) => {
            for (k, v) in o {
                b.insert(k, v);
            }
            Some(b)
        }
    }
}

fn is_empty_clause(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}
