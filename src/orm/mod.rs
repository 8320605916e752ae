//! ORM seam: the per-model delegate the generic service dispatches to, plus two backends.

mod args;
mod memory;
mod params;
mod pg;
mod plan;

pub use args::QueryOptions;
pub use memory::MemoryOrm;
pub use pg::PgOrm;
pub use plan::{NestedOp, RelationWrite, WritePlan};

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One statement of an atomic batch.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchOp {
    Update { where_: Value, data: Map<String, Value> },
    Delete { where_: Value },
}

/// Per-model CRUD primitives. `where` values use the ORM filter dialect
/// (`AND`/`OR`/`NOT`, field equality, operator objects such as `{gt: 1}` or `{in: [..]}`).
#[async_trait]
pub trait ModelDelegate: Send + Sync {
    /// Insert one record; `data` may carry nested relation writes.
    async fn create(&self, data: Map<String, Value>, options: &QueryOptions) -> Result<Value, AppError>;

    async fn create_many(&self, data: Vec<Map<String, Value>>) -> Result<u64, AppError>;

    async fn find_many(&self, options: &QueryOptions) -> Result<Vec<Value>, AppError>;

    async fn find_first(&self, options: &QueryOptions) -> Result<Option<Value>, AppError>;

    /// Lookup by unique key; `options.where_` must identify at most one record.
    async fn find_unique(&self, options: &QueryOptions) -> Result<Option<Value>, AppError>;

    /// Update the record identified by `options.where_`; `None` when it does not exist.
    async fn update(&self, data: Map<String, Value>, options: &QueryOptions) -> Result<Option<Value>, AppError>;

    async fn update_many(&self, where_: &Value, data: Map<String, Value>) -> Result<u64, AppError>;

    async fn delete(&self, options: &QueryOptions) -> Result<Option<Value>, AppError>;

    async fn delete_many(&self, where_: &Value) -> Result<u64, AppError>;

    async fn count(&self, where_: Option<&Value>) -> Result<u64, AppError>;

    /// Run every op in one unit; all succeed or none apply. Returns the affected records.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<Vec<Value>, AppError>;
}

/// Hands out delegates by model name.
pub trait Orm: Send + Sync {
    fn delegate(&self, model: &str) -> Option<Arc<dyn ModelDelegate>>;
}
