//! CrudService: model-agnostic data access over an ORM delegate.

mod crud;
mod relations;
mod validation;

pub use crud::{CrudService, ServiceContext};
pub use relations::{normalize_relations, WriteKind};
pub use validation::{validate_body, BodyValidator, SchemaValidator, TypedDto};
