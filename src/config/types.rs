//! Per-model customization: auth configs, router config, static query options, validation
//! rules, and the `ModuleComponents` bag that carries them (plus code-level pieces).

use crate::auth::{AccessAction, AuthRequirement};
use crate::controller::{Endpoint, OperationHooks};
use crate::orm::QueryOptions;
use crate::routing::{CustomRouter, InterceptorValue};
use crate::service::BodyValidator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

/// Detailed access rule. Empty `roles` admits any authenticated principal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessRuleEntry {
    Roles(Vec<String>),
    Detailed(AccessRule),
}

impl AccessRuleEntry {
    fn to_rule(&self) -> AccessRule {
        match self {
            AccessRuleEntry::Roles(roles) => AccessRule {
                roles: roles.clone(),
                ..AccessRule::default()
            },
            AccessRuleEntry::Detailed(rule) => rule.clone(),
        }
    }
}

/// Either one role list for every action, or a rule per action name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessControlConfig {
    Roles(Vec<String>),
    PerAction(HashMap<String, AccessRuleEntry>),
}

impl AccessControlConfig {
    /// Actions missing from a per-action map have no role restriction.
    pub fn rule_for(&self, action: &AccessAction) -> Option<AccessRule> {
        match self {
            AccessControlConfig::Roles(roles) => Some(AccessRule {
                roles: roles.clone(),
                ..AccessRule::default()
            }),
            AccessControlConfig::PerAction(map) => map.get(action.as_str()).map(AccessRuleEntry::to_rule),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthenticationControl {
    All(bool),
    PerAction(HashMap<String, bool>),
}

impl AuthenticationControl {
    pub fn requires(&self, action: &AccessAction) -> bool {
        match self {
            AuthenticationControl::All(b) => *b,
            AuthenticationControl::PerAction(map) => map.get(action.as_str()).copied().unwrap_or(true),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigs {
    #[serde(default)]
    pub authentication_control: Option<AuthenticationControl>,
    #[serde(default)]
    pub access_control: Option<AccessControlConfig>,
}

impl AuthConfigs {
    /// `None` when the action is explicitly unauthenticated.
    pub fn requirement(&self, resource: &str, action: AccessAction) -> Option<AuthRequirement> {
        let required = self
            .authentication_control
            .as_ref()
            .map(|c| c.requires(&action))
            .unwrap_or(true);
        if !required {
            return None;
        }
        let rule = self.access_control.as_ref().and_then(|a| a.rule_for(&action));
        Some(AuthRequirement {
            resource: resource.to_string(),
            action,
            rule,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisableConfig {
    All(bool),
    Endpoints(HashMap<String, bool>),
    List(Vec<String>),
}

impl Default for DisableConfig {
    fn default() -> Self {
        DisableConfig::All(false)
    }
}

impl DisableConfig {
    pub fn is_disabled(&self, endpoint: Endpoint) -> bool {
        match self {
            DisableConfig::All(b) => *b,
            DisableConfig::Endpoints(map) => map.get(endpoint.name()).copied().unwrap_or(false),
            DisableConfig::List(list) => list.iter().any(|n| n == endpoint.name()),
        }
    }

    pub(crate) fn endpoint_names(&self) -> Vec<&str> {
        match self {
            DisableConfig::All(_) => Vec::new(),
            DisableConfig::Endpoints(map) => map.keys().map(String::as_str).collect(),
            DisableConfig::List(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

/// `"*"` or an explicit list of endpoint names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointSelection {
    Wildcard(String),
    List(Vec<String>),
}

impl Default for EndpointSelection {
    fn default() -> Self {
        EndpointSelection::Wildcard("*".into())
    }
}

impl EndpointSelection {
    pub fn contains(&self, endpoint: Endpoint) -> bool {
        match self {
            EndpointSelection::Wildcard(w) => w == "*",
            EndpointSelection::List(list) => list.iter().any(|n| n == endpoint.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentConfig {
    pub model: String,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub endpoints: EndpointSelection,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    #[serde(default)]
    pub disable: DisableConfig,
    #[serde(default)]
    pub parent: Option<ParentConfig>,
}

/// Static ORM options keyed by `queryOptions`, `save`, a group (`find`, `create`, `update`,
/// `delete`) or an endpoint name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryOptionsConfig(pub HashMap<String, QueryOptions>);

impl QueryOptionsConfig {
    pub const SHARED_KEYS: [&'static str; 6] = ["queryOptions", "save", "find", "create", "update", "delete"];

    /// Layer for one endpoint: `queryOptions` < `save` < group < endpoint.
    pub fn for_endpoint(&self, endpoint: Endpoint) -> QueryOptions {
        let group = endpoint.group();
        let save = matches!(group, "create" | "update");
        let mut keys = vec!["queryOptions"];
        if save {
            keys.push("save");
        }
        keys.push(group);
        keys.push(endpoint.name());
        keys.into_iter()
            .filter_map(|k| self.0.get(k))
            .fold(QueryOptions::default(), |acc, o| acc.layer(o.clone()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationTarget {
    Create,
    Update,
}

/// JSON form of a model's declarative components (`<kebab-name>.json`).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsFile {
    #[serde(default)]
    pub auth_configs: AuthConfigs,
    #[serde(default)]
    pub prisma_query_options: QueryOptionsConfig,
    #[serde(default)]
    pub router_config: RouterConfig,
    #[serde(default)]
    pub schemas: HashMap<ValidationTarget, HashMap<String, ValidationRule>>,
    /// Slot name -> registered interceptor name, or a list of names.
    #[serde(default)]
    pub interceptors: HashMap<String, Value>,
}

/// Everything a model may customize. Every field is optional; defaults mean "generated behavior".
#[derive(Clone, Default)]
pub struct ModuleComponents {
    pub auth_configs: AuthConfigs,
    pub query_options: QueryOptionsConfig,
    pub interceptors: HashMap<String, InterceptorValue>,
    pub router: Option<CustomRouter>,
    pub router_config: RouterConfig,
    pub dtos: HashMap<ValidationTarget, Arc<dyn BodyValidator>>,
    pub schemas: HashMap<ValidationTarget, Arc<dyn BodyValidator>>,
    pub hooks: Option<Arc<dyn OperationHooks>>,
}

impl ModuleComponents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: AuthConfigs) -> Self {
        self.auth_configs = auth;
        self
    }

    pub fn with_query_options(mut self, key: impl Into<String>, options: QueryOptions) -> Self {
        self.query_options.0.insert(key.into(), options);
        self
    }

    /// `slot` is `before<Endpoint>`, `after<Endpoint>` or `on<Endpoint>Error`.
    pub fn with_interceptor(mut self, slot: impl Into<String>, value: impl Into<InterceptorValue>) -> Self {
        self.interceptors.insert(slot.into(), value.into());
        self
    }

    pub fn with_router(mut self, router: CustomRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn with_dto(mut self, target: ValidationTarget, dto: Arc<dyn BodyValidator>) -> Self {
        self.dtos.insert(target, dto);
        self
    }

    pub fn with_schema(mut self, target: ValidationTarget, schema: Arc<dyn BodyValidator>) -> Self {
        self.schemas.insert(target, schema);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn OperationHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Lay code-registered components over file-loaded ones. Map entries extend;
    /// singular pieces replace when set.
    pub fn overlay(mut self, over: ModuleComponents) -> ModuleComponents {
        if over.auth_configs != AuthConfigs::default() {
            self.auth_configs = over.auth_configs;
        }
        self.query_options.0.extend(over.query_options.0);
        self.interceptors.extend(over.interceptors);
        if over.router.is_some() {
            self.router = over.router;
        }
        if over.router_config != RouterConfig::default() {
            self.router_config = over.router_config;
        }
        self.dtos.extend(over.dtos);
        self.schemas.extend(over.schemas);
        if over.hooks.is_some() {
            self.hooks = over.hooks;
        }
        self
    }
}
