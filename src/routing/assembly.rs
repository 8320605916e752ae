//! Router assembly: discover models, load their components, and register custom,
//! generated and nested routes into one axum router.

use super::custom::CustomRouter;
use super::descriptor::{build_descriptor, RouteDescriptor};
use super::middleware::{Interceptor, InterceptorRegistry, MiddlewareChain};
use super::path::{canonical_path, join, param_slots, route_key};
use crate::auth::{require_auth, AuthActionRegistry, AuthGate, AuthRequirement, PrincipalResolver};
use crate::case::to_camel_case;
use crate::config::{validate_components, ComponentLoader, ComponentRegistry, ModuleComponents, Settings};
use crate::controller::{Endpoint, OperationExecutor, RouteBinding};
use crate::error::ConfigError;
use crate::model::{ModelDescriptor, ModelKeys, ModelProvider};
use crate::orm::Orm;
use crate::query::FeatureSettings;
use crate::routes::common_routes;
use crate::service::CrudService;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware::from_fn_with_state,
    routing::MethodRouter,
    Router,
};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info, warn};

/// One mounted route, as listed by `/route-manifest`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredRoute {
    pub method: String,
    /// Full path including the base path.
    pub path: String,
    pub model: String,
    /// `None` for hand-written routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    pub authentication: Option<AuthRequirement>,
    pub validated: bool,
    pub custom: bool,
    pub nested: bool,
}

pub struct AssembledApp {
    pub router: Router,
    pub state: AppState,
}

impl AssembledApp {
    pub fn routes(&self) -> &[RegisteredRoute] {
        &self.state.routes
    }

    pub fn auth_actions(&self) -> &AuthActionRegistry {
        &self.state.auth_actions
    }
}

pub struct RouterAssembly {
    orm: Arc<dyn Orm>,
    provider: Arc<dyn ModelProvider>,
    settings: Settings,
    loader: Option<Arc<dyn ComponentLoader>>,
    resolver: Option<Arc<dyn PrincipalResolver>>,
    interceptors: InterceptorRegistry,
}

impl RouterAssembly {
    pub fn new(orm: Arc<dyn Orm>, provider: Arc<dyn ModelProvider>) -> Self {
        RouterAssembly {
            orm,
            provider,
            settings: Settings::default(),
            loader: None,
            resolver: None,
            interceptors: InterceptorRegistry::new(),
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Without a loader, components come from `settings.components_dir` (if set).
    pub fn loader(mut self, loader: Arc<dyn ComponentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Without a resolver, no route is authenticated.
    pub fn resolver(mut self, resolver: Arc<dyn PrincipalResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Make an interceptor addressable by name from component files.
    pub fn interceptor(mut self, name: impl Into<String>, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.register(name, interceptor);
        self
    }

    pub async fn build(self) -> Result<AssembledApp, ConfigError> {
        let models = self.describe_models()?;
        let known: HashSet<String> = models.iter().map(|m| m.name.clone()).collect();
        let loader = self.component_loader();
        let components = try_join_all(models.iter().map(|m| loader.load(m))).await?;
        for (model, comps) in models.iter().zip(&components) {
            validate_components(model, comps, &known)?;
        }

        let mut mounts = Mounts::default();
        // Hand-written routes of every model go first so generated ones never shadow them.
        for (model, comps) in models.iter().zip(&components) {
            if let Some(router) = &comps.router {
                self.mount_custom(model, router, &mut mounts)?;
            }
        }
        let by_name: HashMap<&str, &Arc<ModelDescriptor>> = models.iter().map(|m| (m.name.as_str(), m)).collect();
        let keys = Arc::new(ModelKeys::new(models.iter().map(Arc::as_ref)));
        let mut auth_actions = AuthActionRegistry::new();
        for (model, comps) in models.iter().zip(&components) {
            self.mount_generated(model, comps, &by_name, &keys, &mut auth_actions, &mut mounts)?;
            info!(model = %model.name, path = %format!("/{}", model.plural_route_name), "model assembled");
        }

        let base = self.settings.base_path.clone();
        let mut routes = mounts.routes;
        for route in &mut routes {
            route.path = full_path(&base, &route.path);
            info!(method = %route.method, path = %route.path, model = %route.model, "route registered");
        }
        let state = AppState {
            settings: Arc::new(self.settings.clone()),
            resources: Arc::new(models.iter().map(|m| m.kebab_name.clone()).collect()),
            auth_actions: Arc::new(auth_actions),
            routes: Arc::new(routes),
        };

        let mut api = Router::new();
        for (path, handler) in mounts.routers {
            api = api.route(&path, handler);
        }
        let api = api.merge(common_routes(state.clone()));
        let router = if base.is_empty() {
            api
        } else {
            Router::new().nest(&base, api)
        };
        let router = router.layer(
            ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(self.settings.body_limit))
                .layer(DefaultBodyLimit::disable()),
        );
        Ok(AssembledApp { router, state })
    }

    fn describe_models(&self) -> Result<Vec<Arc<ModelDescriptor>>, ConfigError> {
        let mut seen = HashSet::new();
        let mut models = Vec::new();
        for name in self.provider.list_models() {
            let model = self
                .provider
                .describe(&name)
                .ok_or_else(|| ConfigError::UnknownModel(name.clone()))?;
            if !seen.insert(model.kebab_name.clone()) {
                return Err(ConfigError::DuplicateResource(model.kebab_name));
            }
            models.push(Arc::new(model));
        }
        Ok(models)
    }

    fn component_loader(&self) -> Arc<dyn ComponentLoader> {
        if let Some(loader) = &self.loader {
            return loader.clone();
        }
        match &self.settings.components_dir {
            Some(dir) => Arc::new(ComponentRegistry::from_dir(dir.clone())),
            None => Arc::new(ComponentRegistry::new()),
        }
    }

    /// Paths outside the model's collection are mounted below it.
    fn mount_custom(&self, model: &ModelDescriptor, router: &CustomRouter, mounts: &mut Mounts) -> Result<(), ConfigError> {
        let collection = format!("/{}", model.plural_route_name);
        for route in router.routes() {
            let Some(handler) = route.handler() else {
                continue;
            };
            let path = if route.path == collection || route.path.starts_with(&format!("{}/", collection)) {
                route.path.clone()
            } else {
                join(&collection, &route.path)
            };
            if mounts.is_taken(&route.method, &path) {
                return Err(ConfigError::InvalidRouter {
                    source_name: router.source().to_string(),
                    reason: format!("{} {} is already mounted", route.method, path),
                });
            }
            mounts.add(
                router.source(),
                route.method.clone(),
                handler,
                RegisteredRoute {
                    method: route.method.to_string(),
                    path,
                    model: model.name.clone(),
                    endpoint: None,
                    authentication: None,
                    validated: false,
                    custom: true,
                    nested: false,
                },
            )?;
        }
        Ok(())
    }

    fn mount_generated(
        &self,
        model: &Arc<ModelDescriptor>,
        comps: &ModuleComponents,
        by_name: &HashMap<&str, &Arc<ModelDescriptor>>,
        keys: &Arc<ModelKeys>,
        auth_actions: &mut AuthActionRegistry,
        mounts: &mut Mounts,
    ) -> Result<(), ConfigError> {
        let delegate = self
            .orm
            .delegate(&model.name)
            .ok_or_else(|| ConfigError::UnknownModel(model.name.clone()))?;
        let executor = Arc::new(OperationExecutor::new(
            CrudService::new(model.clone(), delegate, keys.clone()),
            comps.hooks.clone(),
            FeatureSettings::from(&self.settings),
        ));
        let parent = match &comps.router_config.parent {
            Some(config) => {
                let parent = by_name
                    .get(config.model.as_str())
                    .ok_or_else(|| ConfigError::UnknownModel(config.model.clone()))?;
                let foreign_key = config
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}Id", to_camel_case(&parent.name)));
                Some((*parent, foreign_key, &config.endpoints))
            }
            None => None,
        };

        for endpoint in Endpoint::ALL {
            let descriptor = build_descriptor(model, endpoint, comps, self.settings.validation, auth_actions);
            if descriptor.disabled {
                debug!(model = %model.name, endpoint = %endpoint, "endpoint disabled");
                continue;
            }
            let chain = MiddlewareChain::for_endpoint(&model.name, endpoint, &comps.interceptors, &self.interceptors)?;
            let binding = RouteBinding::new(executor.clone(), endpoint)
                .with_chain(chain)
                .with_static_options(comps.query_options.for_endpoint(endpoint))
                .with_validator(descriptor.validation.clone());
            let path = descriptor.path.clone();
            self.mount_binding(model, &descriptor, path, binding.clone(), false, mounts)?;

            if let Some((parent, foreign_key, endpoints)) = &parent {
                // Endpoints outside the whitelist stay off the nested mount.
                if endpoints.contains(endpoint) {
                    let path = descriptor.nested_path(parent);
                    let nested = binding.with_scope(foreign_key.clone());
                    self.mount_binding(model, &descriptor, path, nested, true, mounts)?;
                }
            }
        }
        Ok(())
    }

    fn mount_binding(
        &self,
        model: &ModelDescriptor,
        descriptor: &RouteDescriptor,
        path: String,
        binding: RouteBinding,
        nested: bool,
        mounts: &mut Mounts,
    ) -> Result<(), ConfigError> {
        let method = descriptor.endpoint.method();
        if mounts.is_taken(&method, &path) {
            warn!(model = %model.name, method = %method, path = %path, "generated route shadowed by custom router; skipped");
            return Ok(());
        }
        let mut handler: MethodRouter = binding.into_method_router()?;
        let authentication = match (&self.resolver, &descriptor.authentication) {
            (Some(resolver), Some(requirement)) => {
                let gate = AuthGate::new(resolver.clone(), requirement.clone());
                handler = handler.route_layer(from_fn_with_state(gate, require_auth));
                Some(requirement.clone())
            }
            _ => None,
        };
        let owner = format!("generated routes of {}", model.name);
        mounts.add(
            &owner,
            method.clone(),
            handler,
            RegisteredRoute {
                method: method.to_string(),
                path,
                model: model.name.clone(),
                endpoint: Some(descriptor.endpoint),
                authentication,
                validated: descriptor.validation.is_some(),
                custom: false,
                nested,
            },
        )
    }
}

#[derive(Default)]
struct Mounts {
    taken: HashSet<(Method, String)>,
    /// Parameter name per branching prefix, with the owner that introduced it.
    params: HashMap<String, (String, String)>,
    routers: BTreeMap<String, MethodRouter>,
    routes: Vec<RegisteredRoute>,
}

impl Mounts {
    fn is_taken(&self, method: &Method, path: &str) -> bool {
        self.taken.contains(&(method.clone(), route_key(path)))
    }

    fn add(&mut self, owner: &str, method: Method, handler: MethodRouter, route: RegisteredRoute) -> Result<(), ConfigError> {
        let path = canonical_path(&route.path);
        for (prefix, name) in param_slots(&path) {
            match self.params.get(&prefix) {
                Some((existing, first_owner)) if *existing != name => {
                    // Hand-written routes are mounted first, so one side is always custom.
                    let source_name = if route.custom { owner } else { first_owner.as_str() };
                    return Err(ConfigError::InvalidRouter {
                        source_name: source_name.to_string(),
                        reason: format!(
                            "parameter ':{}' in {} conflicts with ':{}' at {}/",
                            name, path, existing, prefix
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    self.params.insert(prefix, (name, owner.to_string()));
                }
            }
        }
        self.taken.insert((method, route_key(&path)));
        let merged = match self.routers.remove(&path) {
            Some(existing) => existing.merge(handler),
            None => handler,
        };
        self.routers.insert(path, merged);
        self.routes.push(route);
        Ok(())
    }
}

fn full_path(base: &str, path: &str) -> String {
    match (base.is_empty(), path) {
        (true, _) => path.to_string(),
        (false, "/") => base.to_string(),
        (false, _) => format!("{}{}", base, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DisableConfig, EndpointSelection, ParentConfig, RouterConfig};
    use crate::model::{FieldKind, FieldMeta, RelationFields, StaticModelProvider};
    use crate::orm::MemoryOrm;

    fn models() -> Vec<ModelDescriptor> {
        let id = || FieldMeta { name: "id".into(), kind: FieldKind::Int, is_id: true };
        vec![
            ModelDescriptor::new("User", vec![id()], RelationFields::default()),
            ModelDescriptor::new(
                "Post",
                vec![id(), FieldMeta { name: "userId".into(), kind: FieldKind::Int, is_id: false }],
                RelationFields::default(),
            ),
        ]
    }

    fn assembly(registry: ComponentRegistry) -> RouterAssembly {
        let models = models();
        RouterAssembly::new(Arc::new(MemoryOrm::new(models.clone())), Arc::new(StaticModelProvider::new(models)))
            .loader(Arc::new(registry))
    }

    async fn ok() -> &'static str {
        "ok"
    }

    #[tokio::test]
    async fn every_enabled_endpoint_is_registered() {
        let app = assembly(ComponentRegistry::new()).build().await.unwrap();
        let generated = app.routes().iter().filter(|r| r.endpoint.is_some()).count();
        assert_eq!(generated, 2 * Endpoint::ALL.len());
        assert!(app.routes().iter().all(|r| r.authentication.is_none()));
        // Manage/all plus one entry per (action, resource).
        assert_eq!(app.auth_actions().len(), 1 + 2 * 4);
    }

    #[tokio::test]
    async fn custom_routes_shadow_generated_ones() {
        let registry = ComponentRegistry::new().register(
            "user",
            ModuleComponents::new().with_router(
                CustomRouter::new("users.rs")
                    .route(Method::GET, "/api/users/{id}/", ok)
                    .route(Method::GET, "/stats", ok),
            ),
        );
        let app = assembly(registry).build().await.unwrap();
        let find_one = app
            .routes()
            .iter()
            .filter(|r| r.method == "GET" && r.path == "/users/:id")
            .collect::<Vec<_>>();
        assert_eq!(find_one.len(), 1);
        assert!(find_one[0].custom);
        assert!(app.routes().iter().any(|r| r.custom && r.path == "/users/stats"));
    }

    #[tokio::test]
    async fn conflicting_parameter_names_fail_assembly() {
        let registry = ComponentRegistry::new().register(
            "user",
            ModuleComponents::new().with_router(CustomRouter::new("users.rs").route(Method::GET, "/users/:userId/stats", ok)),
        );
        let err = assembly(registry).build().await.err().unwrap();
        assert!(matches!(err, ConfigError::InvalidRouter { ref source_name, .. } if source_name == "users.rs"));
    }

    #[tokio::test]
    async fn nested_mount_follows_whitelist_and_disable() {
        let registry = ComponentRegistry::new().register(
            "post",
            ModuleComponents::new().with_router_config(RouterConfig {
                disable: DisableConfig::List(vec!["deleteOne".into()]),
                parent: Some(ParentConfig {
                    model: "User".into(),
                    foreign_key: None,
                    endpoints: EndpointSelection::List(vec!["findMany".into(), "findOne".into(), "deleteOne".into()]),
                }),
            }),
        );
        let app = assembly(registry).build().await.unwrap();
        let nested: Vec<_> = app.routes().iter().filter(|r| r.nested).map(|r| r.path.as_str()).collect();
        assert_eq!(nested, vec!["/users/:id/posts", "/users/:id/posts/:child_id"]);
    }

    #[tokio::test]
    async fn base_path_prefixes_manifest_paths() {
        let mut settings = Settings::default();
        settings.base_path = "/api".into();
        let app = assembly(ComponentRegistry::new()).settings(settings).build().await.unwrap();
        assert!(app.routes().iter().all(|r| r.path.starts_with("/api/")));
    }

    #[tokio::test]
    async fn duplicate_resources_fail() {
        let models = vec![
            ModelDescriptor::new("User", vec![], RelationFields::default()),
            ModelDescriptor::new("user", vec![], RelationFields::default()),
        ];
        let err = RouterAssembly::new(Arc::new(MemoryOrm::new(models.clone())), Arc::new(StaticModelProvider::new(models)))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::DuplicateResource(_)));
    }
}
