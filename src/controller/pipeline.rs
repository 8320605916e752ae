//! Per-route request handling: extract, validate, then run
//! `[query options, ...before, generic handler, ...after, send, ...on_error]`.

use super::{Endpoint, OperationExecutor, ParentScope, RequestContext};
use crate::auth::{AccessToken, Principal};
use crate::error::AppError;
use crate::orm::QueryOptions;
use crate::routing::{Flow, MiddlewareChain};
use crate::service::{validate_body, BodyValidator};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{on, MethodFilter, MethodRouter},
    Extension,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything one generated route needs at request time. Built once during assembly.
#[derive(Clone)]
pub struct RouteBinding {
    executor: Arc<OperationExecutor>,
    endpoint: Endpoint,
    chain: Arc<MiddlewareChain>,
    static_options: Arc<QueryOptions>,
    validator: Option<Arc<dyn BodyValidator>>,
    /// Set on nested mounts: the child field holding `:parent_id`.
    scope_key: Option<String>,
}

impl RouteBinding {
    pub fn new(executor: Arc<OperationExecutor>, endpoint: Endpoint) -> Self {
        RouteBinding {
            executor,
            endpoint,
            chain: Arc::new(MiddlewareChain::default()),
            static_options: Arc::new(QueryOptions::default()),
            validator: None,
            scope_key: None,
        }
    }

    pub fn with_chain(mut self, chain: MiddlewareChain) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    pub fn with_static_options(mut self, options: QueryOptions) -> Self {
        self.static_options = Arc::new(options);
        self
    }

    pub fn with_validator(mut self, validator: Option<Arc<dyn BodyValidator>>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_scope(mut self, foreign_key: impl Into<String>) -> Self {
        self.scope_key = Some(foreign_key.into());
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Method router answering only this endpoint's verb.
    pub fn into_method_router(self) -> Result<MethodRouter, crate::error::ConfigError> {
        let method: Method = self.endpoint.method();
        let filter = MethodFilter::try_from(method.clone()).map_err(|_| crate::error::ConfigError::InvalidRouter {
            source_name: self.executor.model().kebab_name.clone(),
            reason: format!("unsupported method {}", method),
        })?;
        Ok(on(filter, handle).with_state(self))
    }

    fn validate(&self, body: &Value) -> Result<(), AppError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        // Bulk bodies that are not arrays are left for the service to classify.
        if matches!(self.endpoint, Endpoint::CreateMany | Endpoint::BatchUpdate) && !body.is_array() {
            return Ok(());
        }
        validate_body(validator.as_ref(), body)
    }

    /// Before-interceptors, the generic handler and after-interceptors. `Halt` stops early.
    async fn drive(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        self.validate(&ctx.body)?;
        for interceptor in &self.chain.before {
            if interceptor.handle(ctx).await? == Flow::Halt {
                return Ok(());
            }
        }
        let result = self.executor.execute(ctx).await?;
        ctx.result = Some(result);
        for interceptor in &self.chain.after {
            if interceptor.handle(ctx).await? == Flow::Halt {
                return Ok(());
            }
        }
        Ok(())
    }

    /// On-error interceptors run in order until one clears `ctx.error` or halts.
    async fn recover(&self, ctx: &mut RequestContext, error: AppError) {
        ctx.result = None;
        ctx.error = Some(error);
        for interceptor in &self.chain.on_error {
            match interceptor.handle(ctx).await {
                Ok(Flow::Next) => {}
                Ok(Flow::Halt) => break,
                Err(replaced) => ctx.error = Some(replaced),
            }
            if ctx.error.is_none() {
                break;
            }
        }
    }

    async fn run(&self, mut ctx: RequestContext) -> Response {
        ctx.query_options = std::mem::take(&mut ctx.query_options).layer((*self.static_options).clone());
        if let Err(error) = self.drive(&mut ctx).await {
            tracing::debug!(
                model = %ctx.model.name,
                endpoint = %self.endpoint,
                error = %error,
                "operation failed"
            );
            self.recover(&mut ctx, error).await;
        }
        if let Some(error) = ctx.error.take() {
            return error.into_response();
        }
        match ctx.result.take() {
            Some(result) => result.into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

fn parse_body(bytes: &Bytes) -> Result<Value, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| AppError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// The generic handler behind every generated route.
pub async fn handle(
    State(binding): State<RouteBinding>,
    path: Option<Path<HashMap<String, String>>>,
    Query(query): Query<Vec<(String, String)>>,
    principal: Option<Extension<Principal>>,
    token: Option<Extension<AccessToken>>,
    defaults: Option<Extension<QueryOptions>>,
    bytes: Bytes,
) -> Response {
    let body = match parse_body(&bytes) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    let mut ctx = RequestContext::new(binding.executor.descriptor(), binding.endpoint);
    ctx.params = path.map(|Path(p)| p).unwrap_or_default();
    if binding.scope_key.is_some() {
        // Nested mounts route as `/{parents}/:id/{plural}/:child_id`.
        if let Some(parent) = ctx.params.remove("id") {
            ctx.params.insert("parent_id".into(), parent);
        }
        if let Some(child) = ctx.params.remove("child_id") {
            ctx.params.insert("id".into(), child);
        }
    }
    ctx.query = query;
    ctx.body = body;
    ctx.principal = principal.map(|Extension(p)| p);
    ctx.access_token = token.map(|Extension(AccessToken(t))| t);
    ctx.query_options = defaults.map(|Extension(o)| o).unwrap_or_default();
    let scope = binding.scope_key.as_ref().and_then(|fk| {
        ctx.param("parent_id").map(|raw| ParentScope {
            foreign_key: fk.clone(),
            value: ctx.model.coerce(fk, raw),
        })
    });
    ctx.scope = scope;
    tracing::debug!(model = %ctx.model.name, endpoint = %binding.endpoint, "request");
    binding.run(ctx).await
}
