//! Process-wide settings, read from `CRUDFORGE_*` environment variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// How request bodies are validated on create/update endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Typed validators registered per model (`ModuleComponents::dtos`).
    Dto,
    /// Declarative rule sets (`ModuleComponents::schemas`).
    Schema,
}

impl FromStr for ValidationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dto" | "class-validator" => Ok(ValidationMode::Dto),
            "schema" | "zod" => Ok(ValidationMode::Schema),
            other => Err(ConfigError::Validation(format!("unknown validation mode '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Settings {
    /// Prefix for every generated route, e.g. `/api`. Empty for none.
    pub base_path: String,
    pub validation: Option<ValidationMode>,
    pub default_limit: u64,
    pub max_limit: Option<u64>,
    /// Accept the raw `prismaQueryOptions` query parameter.
    pub allow_dangerous_query_options: bool,
    pub body_limit: usize,
    /// Directory holding `<kebab-name>.json` component files.
    pub components_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_path: String::new(),
            validation: None,
            default_limit: 30,
            max_limit: None,
            allow_dangerous_query_options: false,
            body_limit: 2 * 1024 * 1024,
            components_dir: None,
        }
    }
}

impl Settings {
    /// Load `.env` (if any) and read overrides from the environment.
    pub fn from_env() -> Result<Settings, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
        let mut s = Settings::default();
        if let Some(base) = lookup("CRUDFORGE_BASE_PATH") {
            s.base_path = normalize_base(&base);
        }
        if let Some(mode) = lookup("CRUDFORGE_VALIDATION") {
            s.validation = match mode.trim() {
                "" | "none" => None,
                m => Some(m.parse()?),
            };
        }
        if let Some(v) = lookup("CRUDFORGE_DEFAULT_LIMIT") {
            s.default_limit = parse_num("CRUDFORGE_DEFAULT_LIMIT", &v)?;
            if s.default_limit == 0 {
                return Err(ConfigError::Validation("CRUDFORGE_DEFAULT_LIMIT must be positive".into()));
            }
        }
        if let Some(v) = lookup("CRUDFORGE_MAX_LIMIT") {
            s.max_limit = Some(parse_num("CRUDFORGE_MAX_LIMIT", &v)?);
        }
        if let Some(v) = lookup("CRUDFORGE_ALLOW_DANGEROUS_QUERY_OPTIONS") {
            s.allow_dangerous_query_options = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("CRUDFORGE_BODY_LIMIT") {
            s.body_limit = parse_num("CRUDFORGE_BODY_LIMIT", &v)?;
        }
        if let Some(dir) = lookup("CRUDFORGE_COMPONENTS_DIR") {
            s.components_dir = Some(PathBuf::from(dir));
        }
        Ok(s)
    }
}

fn parse_num<T: FromStr>(key: &str, v: &str) -> Result<T, ConfigError> {
    v.trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("{} must be a number, got '{}'", key, v)))
}

fn normalize_base(base: &str) -> String {
    let trimmed = base.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
