//! Per-model hooks called at fixed points of the operation pipeline.

use super::{PipelineResult, RequestContext};
use crate::error::AppError;
use crate::orm::QueryOptions;
use crate::query::ComputedQuery;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Arguments of one service call, as assembled by the executor.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceCall {
    CreateOne { body: Value, options: QueryOptions },
    CreateMany { body: Value },
    FindMany { filters: Option<Value>, options: QueryOptions },
    FindOne { filters: Map<String, Value>, options: QueryOptions },
    UpdateOne { filters: Map<String, Value>, body: Value, options: QueryOptions },
    UpdateMany { filters: Value, body: Value },
    DeleteOne { filters: Map<String, Value>, options: QueryOptions },
    DeleteMany { filters: Value },
    BatchUpdate { entries: Value, filters: Option<Value> },
    BatchDelete { entries: Value, filters: Option<Value> },
}

/// What the service returned.
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceOutput {
    Record(Option<Value>),
    Records(Vec<Value>),
    /// `findMany` rows plus the total under the same filter.
    Page { data: Vec<Value>, total: u64 },
    Count(u64),
}

impl ServiceOutput {
    pub fn into_value(self) -> Value {
        match self {
            ServiceOutput::Record(r) => r.unwrap_or(Value::Null),
            ServiceOutput::Records(rows) | ServiceOutput::Page { data: rows, .. } => Value::Array(rows),
            ServiceOutput::Count(n) => Value::Number(n.into()),
        }
    }
}

/// Every method defaults to a no-op; an error from any of them fails the request
/// exactly like a service error.
#[async_trait]
pub trait OperationHooks: Send + Sync {
    async fn before_query(&self, _ctx: &RequestContext) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_query(&self, _ctx: &RequestContext, _query: &mut ComputedQuery) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_service(&self, _ctx: &RequestContext, _call: &mut ServiceCall) -> Result<(), AppError> {
        Ok(())
    }

    async fn after_service(&self, _ctx: &RequestContext, _output: &mut ServiceOutput) -> Result<(), AppError> {
        Ok(())
    }

    async fn before_response(&self, _ctx: &RequestContext, _result: &mut PipelineResult) -> Result<(), AppError> {
        Ok(())
    }
}
