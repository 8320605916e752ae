//! Load per-model components: `<kebab-name>.json` files from a directory, overlaid with
//! components registered in code.

use crate::config::types::{ComponentsFile, ModuleComponents, ValidationTarget};
use crate::error::ConfigError;
use crate::model::ModelDescriptor;
use crate::routing::InterceptorValue;
use crate::service::{BodyValidator, SchemaValidator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of a model's customizations. A model with nothing to customize gets defaults.
#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load(&self, model: &ModelDescriptor) -> Result<ModuleComponents, ConfigError>;
}

#[derive(Clone, Default)]
pub struct ComponentRegistry {
    dir: Option<PathBuf>,
    registered: HashMap<String, ModuleComponents>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        ComponentRegistry {
            dir: Some(dir.into()),
            registered: HashMap::new(),
        }
    }

    /// Components for the model whose kebab-case name is `kebab_name`.
    /// Registering twice for one model overlays the second on the first.
    pub fn register(mut self, kebab_name: impl Into<String>, components: ModuleComponents) -> Self {
        let key = kebab_name.into();
        let merged = match self.registered.remove(&key) {
            Some(existing) => existing.overlay(components),
            None => components,
        };
        self.registered.insert(key, merged);
        self
    }

    async fn load_file(&self, model: &ModelDescriptor) -> Result<Option<ComponentsFile>, ConfigError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.json", model.kebab_name));
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        if !exists {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let file = serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(model = %model.name, path = %path.display(), "loaded components file");
        Ok(Some(file))
    }
}

#[async_trait]
impl ComponentLoader for ComponentRegistry {
    async fn load(&self, model: &ModelDescriptor) -> Result<ModuleComponents, ConfigError> {
        let base = match self.load_file(model).await? {
            Some(file) => from_file(model, file)?,
            None => ModuleComponents::default(),
        };
        Ok(match self.registered.get(&model.kebab_name) {
            Some(code) => base.overlay(code.clone()),
            None => base,
        })
    }
}

/// Convert the declarative file form. Update schemas validate partially.
pub fn from_file(model: &ModelDescriptor, file: ComponentsFile) -> Result<ModuleComponents, ConfigError> {
    let mut interceptors = HashMap::new();
    for (slot, value) in &file.interceptors {
        interceptors.insert(slot.clone(), InterceptorValue::from_json(&model.name, slot, value)?);
    }
    let mut schemas: HashMap<ValidationTarget, Arc<dyn BodyValidator>> = HashMap::new();
    for (target, rules) in file.schemas {
        let validator = SchemaValidator::new(rules)?;
        let validator = match target {
            ValidationTarget::Create => validator,
            ValidationTarget::Update => validator.partial(),
        };
        schemas.insert(target, Arc::new(validator));
    }
    Ok(ModuleComponents {
        auth_configs: file.auth_configs,
        query_options: file.prisma_query_options,
        interceptors,
        router_config: file.router_config,
        schemas,
        ..ModuleComponents::default()
    })
}

/// Read a schema document for `StaticModelProvider::from_json` from disk.
pub async fn read_schema(path: &Path) -> Result<String, ConfigError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
}
