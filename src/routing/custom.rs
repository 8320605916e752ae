//! User-supplied routers mounted ahead of the generated routes.

use super::path::{canonical_path, route_key};
use crate::error::ConfigError;
use axum::{
    handler::Handler,
    http::Method,
    routing::{on, MethodFilter, MethodRouter},
};
use std::collections::HashSet;

#[derive(Clone)]
pub struct CustomRoute {
    pub method: Method,
    /// Canonical path, relative to the base path (e.g. `/users/:id/stats`).
    pub path: String,
    handler: Option<MethodRouter>,
}

impl CustomRoute {
    pub fn handler(&self) -> Option<MethodRouter> {
        self.handler.clone()
    }
}

/// A model's hand-written routes. Any route here wins over the generated route with the
/// same method and path.
#[derive(Clone)]
pub struct CustomRouter {
    source: String,
    routes: Vec<CustomRoute>,
}

impl CustomRouter {
    /// `source` names where the router came from; it appears in configuration errors.
    pub fn new(source: impl Into<String>) -> Self {
        CustomRouter {
            source: source.into(),
            routes: Vec::new(),
        }
    }

    pub fn route<H, T>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let handler = MethodFilter::try_from(method.clone()).ok().map(|f| on(f, handler));
        self.routes.push(CustomRoute {
            method,
            path: canonical_path(path),
            handler,
        });
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn routes(&self) -> &[CustomRoute] {
        &self.routes
    }

    /// Structural check run once at assembly: at least one route, supported methods,
    /// and no method/path pair declared twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRouter {
            source_name: self.source.clone(),
            reason,
        };
        if self.routes.is_empty() {
            return Err(invalid("router declares no routes".into()));
        }
        let mut seen = HashSet::new();
        for route in &self.routes {
            if route.handler.is_none() {
                return Err(invalid(format!("unsupported method {} on {}", route.method, route.path)));
            }
            if !seen.insert((route.method.clone(), route_key(&route.path))) {
                return Err(invalid(format!("{} {} is declared twice", route.method, route.path)));
            }
        }
        Ok(())
    }
}
