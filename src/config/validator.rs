//! Component validation: every name a component refers to must exist. Runs once at assembly.

use crate::config::types::{EndpointSelection, ModuleComponents, QueryOptionsConfig};
use crate::controller::Endpoint;
use crate::error::ConfigError;
use crate::model::ModelDescriptor;
use crate::routing::parse_slot;
use std::collections::HashSet;

pub fn validate_components(
    model: &ModelDescriptor,
    components: &ModuleComponents,
    known_models: &HashSet<String>,
) -> Result<(), ConfigError> {
    let unknown = |name: &str, context: &str| ConfigError::UnknownEndpoint {
        endpoint: name.to_string(),
        context: format!("{} of {}", context, model.name),
    };

    for key in components.query_options.0.keys() {
        if !QueryOptionsConfig::SHARED_KEYS.contains(&key.as_str()) && Endpoint::from_name(key).is_none() {
            return Err(unknown(key, "prismaQueryOptions"));
        }
    }

    for name in components.router_config.disable.endpoint_names() {
        if Endpoint::from_name(name).is_none() {
            return Err(unknown(name, "routerConfig.disable"));
        }
    }

    if let Some(parent) = &components.router_config.parent {
        if !known_models.contains(&parent.model) {
            return Err(ConfigError::UnknownModel(parent.model.clone()));
        }
        if let EndpointSelection::List(list) = &parent.endpoints {
            if let Some(bad) = list.iter().find(|n| Endpoint::from_name(n).is_none()) {
                return Err(unknown(bad, "routerConfig.parent.endpoints"));
            }
        }
        if let EndpointSelection::Wildcard(w) = &parent.endpoints {
            if w != "*" {
                return Err(unknown(w, "routerConfig.parent.endpoints"));
            }
        }
    }

    for slot in components.interceptors.keys() {
        if parse_slot(slot).is_none() {
            return Err(ConfigError::InvalidInterceptor {
                model: model.name.clone(),
                slot: slot.clone(),
                reason: "not a before<Endpoint>, after<Endpoint> or on<Endpoint>Error slot".into(),
            });
        }
    }

    if let Some(router) = &components.router {
        router.validate()?;
    }
    Ok(())
}
