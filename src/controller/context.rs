//! Request-scoped state threaded through a route's middleware chain.

use super::Endpoint;
use crate::auth::Principal;
use crate::error::AppError;
use crate::model::ModelDescriptor;
use crate::orm::QueryOptions;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Filter and body stamp applied to requests arriving through a nested parent mount.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentScope {
    pub foreign_key: String,
    pub value: Value,
}

/// The generic handler's outcome, handed to after-interceptors and then sent.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineResult {
    pub status: StatusCode,
    /// `None` sends an empty body.
    pub body: Option<Value>,
    /// Data that is not part of the response, e.g. the record removed by `deleteOne`.
    pub additional_data: Option<Value>,
}

impl PipelineResult {
    pub fn json(status: StatusCode, body: Value) -> Self {
        PipelineResult {
            status,
            body: Some(body),
            additional_data: None,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        PipelineResult {
            status,
            body: None,
            additional_data: None,
        }
    }
}

impl IntoResponse for PipelineResult {
    fn into_response(self) -> Response {
        match self.body {
            Some(body) if self.status != StatusCode::NO_CONTENT => (self.status, Json(body)).into_response(),
            _ => self.status.into_response(),
        }
    }
}

pub struct RequestContext {
    pub model: Arc<ModelDescriptor>,
    pub endpoint: Endpoint,
    /// Path parameters (`id`, `parent_id`).
    pub params: HashMap<String, String>,
    /// Query string pairs, in request order.
    pub query: Vec<(String, String)>,
    /// Parsed JSON body; `Null` when absent.
    pub body: Value,
    pub principal: Option<Principal>,
    pub access_token: Option<String>,
    /// Request-attached ORM options; the executor layers query-derived options on top.
    pub query_options: QueryOptions,
    pub scope: Option<ParentScope>,
    pub result: Option<PipelineResult>,
    pub error: Option<AppError>,
    /// Scratch space shared by the interceptors of one request.
    pub locals: Map<String, Value>,
}

impl RequestContext {
    pub fn new(model: Arc<ModelDescriptor>, endpoint: Endpoint) -> Self {
        RequestContext {
            model,
            endpoint,
            params: HashMap::new(),
            query: Vec::new(),
            body: Value::Null,
            principal: None,
            access_token: None,
            query_options: QueryOptions::default(),
            scope: None,
            result: None,
            error: None,
            locals: Map::new(),
        }
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
