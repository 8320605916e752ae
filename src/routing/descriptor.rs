//! Route descriptors: the resolved path, disable flag, auth requirement and body validator
//! of one (model, endpoint) pair.

use crate::auth::{AuthActionRegistry, AuthRequirement};
use crate::config::{ModuleComponents, ValidationMode};
use crate::controller::Endpoint;
use crate::model::ModelDescriptor;
use crate::service::BodyValidator;
use std::sync::Arc;

#[derive(Clone)]
pub struct RouteDescriptor {
    pub endpoint: Endpoint,
    pub path: String,
    pub disabled: bool,
    /// `None` when the endpoint is explicitly unauthenticated.
    pub authentication: Option<AuthRequirement>,
    pub validation: Option<Arc<dyn BodyValidator>>,
}

impl RouteDescriptor {
    /// The same route below a parent record: `/{parents}/:id/{plural}[/many|/batch|/:child_id]`.
    pub fn nested_path(&self, parent: &ModelDescriptor) -> String {
        let own = match self.path.strip_suffix("/:id") {
            Some(collection) => format!("{}/:child_id", collection),
            None => self.path.clone(),
        };
        format!("/{}/:id{}", parent.plural_route_name, own)
    }
}

/// Resolve one endpoint's descriptor and record its capability in `registry`
/// (enabled endpoints only; repeated pairs are ignored by the registry).
pub fn build_descriptor(
    model: &ModelDescriptor,
    endpoint: Endpoint,
    components: &ModuleComponents,
    mode: Option<ValidationMode>,
    registry: &mut AuthActionRegistry,
) -> RouteDescriptor {
    let path = format!("/{}{}", model.plural_route_name, endpoint.path_suffix());
    let disabled = components.router_config.disable.is_disabled(endpoint);
    let action = endpoint.access_action();
    let authentication = components.auth_configs.requirement(&model.kebab_name, action.clone());
    if !disabled {
        let rule = authentication.as_ref().and_then(|a| a.rule.as_ref());
        registry.add(action, &model.kebab_name, rule);
    }
    let validation = match (mode, endpoint.validation_target()) {
        (Some(ValidationMode::Dto), Some(target)) => components.dtos.get(&target).cloned(),
        (Some(ValidationMode::Schema), Some(target)) => components.schemas.get(&target).cloned(),
        _ => None,
    };
    RouteDescriptor {
        endpoint,
        path,
        disabled,
        authentication,
        validation,
    }
}
