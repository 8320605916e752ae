//! Generic controller: the operation table, the executor and the per-route pipeline.

mod context;
mod executor;
mod hooks;
mod operation;
mod pipeline;

pub use context::{ParentScope, PipelineResult, RequestContext};
pub use executor::OperationExecutor;
pub use hooks::{OperationHooks, ServiceCall, ServiceOutput};
pub use operation::{Endpoint, OperationConfig, QueryFeature, ResponseShape, OPERATIONS};
pub use pipeline::{handle, RouteBinding};
