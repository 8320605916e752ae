//! crudforge: convention-driven REST API generator. Every discovered model gets CRUD,
//! bulk and batch routes with query features, validation, interceptors and access control.

pub mod auth;
pub mod case;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod orm;
pub mod query;
pub mod response;
pub mod routes;
pub mod routing;
pub mod service;
pub mod state;

pub use auth::{AccessAction, AuthActionRegistry, Principal, PrincipalResolver, StaticTokenResolver};
pub use config::{ComponentLoader, ComponentRegistry, ModuleComponents, Settings, ValidationMode};
pub use controller::{Endpoint, OperationHooks, RequestContext};
pub use error::{AppError, ConfigError};
pub use model::{ModelDescriptor, ModelKeys, ModelProvider, StaticModelProvider};
pub use orm::{MemoryOrm, Orm, PgOrm, QueryOptions};
pub use routes::common_routes;
pub use routing::{interceptor_fn, AssembledApp, CustomRouter, Flow, Interceptor, RouterAssembly};
pub use service::CrudService;
pub use state::AppState;
