//! Read-only state shared by the reflection routes. Built once by router assembly.

use crate::auth::AuthActionRegistry;
use crate::config::Settings;
use crate::routing::RegisteredRoute;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Kebab-case names of every exposed model, in discovery order.
    pub resources: Arc<Vec<String>>,
    pub auth_actions: Arc<AuthActionRegistry>,
    pub routes: Arc<Vec<RegisteredRoute>>,
}
