//! The request-time pipeline shared by every canonical operation. One executor per model;
//! the per-operation differences come from `OperationConfig`.

use super::hooks::{OperationHooks, ServiceCall, ServiceOutput};
use super::operation::{OperationConfig, QueryFeature, ResponseShape};
use super::{Endpoint, ParentScope, PipelineResult, RequestContext};
use crate::error::AppError;
use crate::model::{FieldKind, ModelDescriptor};
use crate::orm::QueryOptions;
use crate::query::operators::single;
use crate::response;
use crate::query::{
    has_filter_keys, reject_deprecated, requested_filter_mode, ApiFeatures, ComputedQuery, FeatureSettings,
    FilterMode,
};
use crate::service::{CrudService, ServiceContext};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct OperationExecutor {
    service: CrudService,
    hooks: Option<Arc<dyn OperationHooks>>,
    settings: FeatureSettings,
}

impl OperationExecutor {
    pub fn new(service: CrudService, hooks: Option<Arc<dyn OperationHooks>>, settings: FeatureSettings) -> Self {
        OperationExecutor {
            service,
            hooks,
            settings,
        }
    }

    pub fn model(&self) -> &ModelDescriptor {
        self.service.model()
    }

    pub fn descriptor(&self) -> Arc<ModelDescriptor> {
        self.service.descriptor()
    }

    /// Run `ctx.endpoint` end to end and return the shaped result. Failures are classified,
    /// never rendered here.
    pub async fn execute(&self, ctx: &RequestContext) -> Result<PipelineResult, AppError> {
        let config = ctx.endpoint.config();
        if let Some(hooks) = &self.hooks {
            hooks.before_query(ctx).await?;
        }

        reject_deprecated(&ctx.query)?;
        if config.requires_non_empty_filter_for_bulk && !has_filter_keys(&ctx.query) && ctx.scope.is_none() {
            return Err(AppError::MissingRequestQueryParameters(format!(
                "{} requires at least one filter in the query string",
                config.endpoint
            )));
        }
        let mode = filter_mode(config, &ctx.query)?;

        let mut computed = self.compute(config, &ctx.query, mode)?;
        if let Some(hooks) = &self.hooks {
            hooks.after_query(ctx, &mut computed).await?;
        }

        let (mut call, not_found) = self.service_call(ctx, computed)?;
        if let Some(hooks) = &self.hooks {
            hooks.before_service(ctx, &mut call).await?;
        }

        let service_ctx = ServiceContext {
            user: ctx.principal.clone(),
            access_token: ctx.access_token.clone(),
        };
        let mut output = self.dispatch(call, &service_ctx).await?;
        if let Some(hooks) = &self.hooks {
            hooks.after_service(ctx, &mut output).await?;
        }

        let mut result = self.shape(config, output, not_found)?;
        if let Some(hooks) = &self.hooks {
            hooks.before_response(ctx, &mut result).await?;
        }
        Ok(result)
    }

    fn compute(
        &self,
        config: &OperationConfig,
        query: &[(String, String)],
        mode: FilterMode,
    ) -> Result<ComputedQuery, AppError> {
        let mut features = ApiFeatures::new(self.model(), query, &self.settings);
        if config.uses(QueryFeature::Filter) {
            features = features.filter(mode)?;
        }
        if config.uses(QueryFeature::Sort) {
            features = features.sort()?;
        }
        if config.uses(QueryFeature::LimitFields) {
            features = features.limit_fields()?;
        }
        if config.uses(QueryFeature::Paginate) {
            features = features.paginate()?;
        }
        Ok(features.finish())
    }

    /// Service arguments for the operation, plus the message used if nothing is found.
    /// Options layer as: request defaults (already holding static config) < computed.
    fn service_call(&self, ctx: &RequestContext, computed: ComputedQuery) -> Result<(ServiceCall, String), AppError> {
        let model = self.model();
        let options = ctx.query_options.clone().layer(computed.options);
        let mut clauses: Vec<Value> = computed.where_.into_iter().collect();
        let from_query = !clauses.is_empty();
        if let Some(scope) = &ctx.scope {
            clauses.push(single(&scope.foreign_key, scope.value.clone()));
        }
        let where_ = combine(clauses);
        let mut not_found = format!("{} not found", model.name);

        let call = match ctx.endpoint {
            Endpoint::CreateOne => ServiceCall::CreateOne {
                body: stamp(ctx.body.clone(), ctx.scope.as_ref()),
                options,
            },
            Endpoint::CreateMany => ServiceCall::CreateMany {
                body: stamp(ctx.body.clone(), ctx.scope.as_ref()),
            },
            Endpoint::FindMany => ServiceCall::FindMany { filters: where_, options },
            Endpoint::FindOne | Endpoint::UpdateOne | Endpoint::DeleteOne => {
                let raw = ctx
                    .param("id")
                    .ok_or_else(|| AppError::BadRequest("missing path parameter 'id'".into()))?;
                if !from_query {
                    not_found = format!("{} with ID {} not found", model.name, raw);
                }
                let id_field = model.id_field();
                let mut filters = Map::new();
                filters.insert(id_field.to_string(), model.coerce(id_field, raw));
                if let Some(w) = where_ {
                    filters.insert("AND".into(), Value::Array(vec![w]));
                }
                match ctx.endpoint {
                    Endpoint::FindOne => ServiceCall::FindOne { filters, options },
                    Endpoint::UpdateOne => ServiceCall::UpdateOne {
                        filters,
                        body: ctx.body.clone(),
                        options,
                    },
                    _ => ServiceCall::DeleteOne { filters, options },
                }
            }
            Endpoint::UpdateMany | Endpoint::DeleteMany => {
                let filters = and_all(options.where_, where_).ok_or_else(|| {
                    AppError::MissingRequestQueryParameters(format!(
                        "{} requires at least one filter in the query string",
                        ctx.endpoint
                    ))
                })?;
                if ctx.endpoint == Endpoint::UpdateMany {
                    ServiceCall::UpdateMany {
                        filters,
                        body: ctx.body.clone(),
                    }
                } else {
                    ServiceCall::DeleteMany { filters }
                }
            }
            Endpoint::BatchUpdate => ServiceCall::BatchUpdate {
                entries: ctx.body.clone(),
                filters: and_all(options.where_, where_),
            },
            Endpoint::BatchDelete => ServiceCall::BatchDelete {
                entries: ctx.body.clone(),
                filters: and_all(options.where_, where_),
            },
        };
        Ok((call, not_found))
    }

    async fn dispatch(&self, call: ServiceCall, sctx: &ServiceContext) -> Result<ServiceOutput, AppError> {
        let service = &self.service;
        Ok(match call {
            ServiceCall::CreateOne { body, options } => {
                ServiceOutput::Record(Some(service.create_one(body, options, sctx).await?))
            }
            ServiceCall::CreateMany { body } => ServiceOutput::Count(service.create_many(body, sctx).await?),
            ServiceCall::FindMany { filters, options } => {
                let count_where = and_all(options.where_.clone(), filters.clone());
                let (data, total) = tokio::try_join!(
                    service.find_many(filters, options, sctx),
                    service.count(count_where.as_ref(), sctx)
                )?;
                ServiceOutput::Page { data, total }
            }
            ServiceCall::FindOne { filters, options } => ServiceOutput::Record(if self.id_unmatchable(&filters) {
                None
            } else {
                service.find_one(&filters, options, sctx).await?
            }),
            ServiceCall::UpdateOne { filters, body, options } => {
                ServiceOutput::Record(if self.id_unmatchable(&filters) {
                    None
                } else {
                    service.update_one(&filters, body, options, sctx).await?
                })
            }
            ServiceCall::DeleteOne { filters, options } => ServiceOutput::Record(if self.id_unmatchable(&filters) {
                None
            } else {
                service.delete_one(&filters, options, sctx).await?
            }),
            ServiceCall::UpdateMany { filters, body } => {
                ServiceOutput::Count(service.update_many(&filters, body, sctx).await?)
            }
            ServiceCall::DeleteMany { filters } => ServiceOutput::Count(service.delete_many(&filters, sctx).await?),
            ServiceCall::BatchUpdate { entries, filters } => {
                ServiceOutput::Records(service.batch_update(entries, filters, sctx).await?)
            }
            ServiceCall::BatchDelete { entries, filters } => {
                ServiceOutput::Records(service.batch_delete(entries, filters, sctx).await?)
            }
        })
    }

    /// A path id that never parsed into the key's type (`me` on an integer key) cannot match.
    fn id_unmatchable(&self, filters: &Map<String, Value>) -> bool {
        let model = self.model();
        let id_field = model.id_field();
        let Some(Value::String(raw)) = filters.get(id_field) else {
            return false;
        };
        match model.field(id_field).map(|f| f.kind) {
            Some(FieldKind::Int) | Some(FieldKind::Float) => true,
            Some(FieldKind::Uuid) => uuid::Uuid::parse_str(raw).is_err(),
            _ => false,
        }
    }

    fn shape(&self, config: &OperationConfig, output: ServiceOutput, not_found: String) -> Result<PipelineResult, AppError> {
        let status = config.success_status;
        match (config.shape, output) {
            (ResponseShape::Single | ResponseShape::Empty, ServiceOutput::Record(None)) => {
                Err(AppError::NotFound(not_found))
            }
            (ResponseShape::Single, ServiceOutput::Record(Some(record))) => {
                Ok(PipelineResult::json(status, response::single(record)))
            }
            (ResponseShape::Empty, ServiceOutput::Record(Some(record))) => Ok(PipelineResult {
                additional_data: Some(record),
                ..PipelineResult::empty(status)
            }),
            (ResponseShape::Paginated, ServiceOutput::Page { data, total }) => {
                Ok(PipelineResult::json(status, response::paginated(total, data)))
            }
            (ResponseShape::BulkCount, ServiceOutput::Count(0)) if config.requires_non_empty_filter_for_bulk => {
                Err(AppError::NoRecordsAffected(format!(
                    "no {} records matched the given filters",
                    self.model().name
                )))
            }
            (ResponseShape::BulkCount, ServiceOutput::Count(count)) => Ok(PipelineResult::json(status, response::bulk_count(count))),
            (ResponseShape::BatchArray, ServiceOutput::Records(rows)) if rows.is_empty() => Err(
                AppError::NoRecordsAffected(format!("no {} records matched the batch", self.model().name)),
            ),
            (ResponseShape::BatchArray, ServiceOutput::Records(rows)) => {
                Ok(PipelineResult::json(status, response::batch(rows)))
            }
            (_, other) => Ok(PipelineResult::json(status, response::single(other.into_value()))),
        }
    }
}

/// Bulk mutations are always AND-combined; an explicit OR is refused.
fn filter_mode(config: &OperationConfig, query: &[(String, String)]) -> Result<FilterMode, AppError> {
    let requested = requested_filter_mode(query)?;
    if config.forbid_or_filter_mode {
        if requested == Some(FilterMode::Or) {
            return Err(AppError::InvalidFilterMode(format!(
                "filterMode=OR is not allowed for {}",
                config.endpoint
            )));
        }
        return Ok(FilterMode::And);
    }
    Ok(requested.unwrap_or(FilterMode::Or))
}

fn combine(mut clauses: Vec<Value>) -> Option<Value> {
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(single("AND", Value::Array(clauses))),
    }
}

fn and_all(a: Option<Value>, b: Option<Value>) -> Option<Value> {
    QueryOptions::default()
        .with_where(a.unwrap_or(Value::Null))
        .with_where(b.unwrap_or(Value::Null))
        .where_
}

/// Nested mounts write the parent key into every created record.
fn stamp(body: Value, scope: Option<&ParentScope>) -> Value {
    let Some(scope) = scope else {
        return body;
    };
    match body {
        Value::Object(mut m) => {
            m.insert(scope.foreign_key.clone(), scope.value.clone());
            Value::Object(m)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(|i| stamp(i, Some(scope))).collect()),
        other => other,
    }
}
