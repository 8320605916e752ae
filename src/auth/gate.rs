//! Per-route authentication gate: bearer token -> principal -> role check.

use super::AccessAction;
use crate::config::AccessRule;
use crate::error::AppError;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The authenticated caller. Token verification (JWT etc.) lives behind `PrincipalResolver`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Value,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}

/// Raw bearer token of the current request, stored next to the principal.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken(pub String);

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    /// `Ok(None)` for unknown or expired tokens.
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, AppError>;
}

/// Fixed token table, for demos and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl PrincipalResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Result<Option<Principal>, AppError> {
        Ok(self.tokens.get(token).cloned())
    }
}

/// What one route demands of its caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequirement {
    pub resource: String,
    pub action: AccessAction,
    /// `None`: any authenticated principal passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<AccessRule>,
}

#[derive(Clone)]
pub struct AuthGate {
    resolver: Arc<dyn PrincipalResolver>,
    requirement: Arc<AuthRequirement>,
}

impl AuthGate {
    pub fn new(resolver: Arc<dyn PrincipalResolver>, requirement: AuthRequirement) -> Self {
        AuthGate {
            resolver,
            requirement: Arc::new(requirement),
        }
    }

    fn authorize(&self, principal: &Principal) -> Result<(), AppError> {
        let Some(rule) = &self.requirement.rule else {
            return Ok(());
        };
        if rule.roles.is_empty() || principal.has_any_role(&rule.roles) {
            return Ok(());
        }
        Err(AppError::Forbidden(rule.error_message.clone().unwrap_or_else(|| {
            format!(
                "not allowed to {} {}",
                self.requirement.action.as_str().to_lowercase(),
                self.requirement.resource
            )
        })))
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Route layer installed by router assembly on every authenticated endpoint.
pub async fn require_auth(State(gate): State<AuthGate>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized("authentication required".into()))?;
    let principal = gate
        .resolver
        .resolve(&token)
        .await?
        .ok_or_else(|| AppError::Unauthorized("invalid or expired token".into()))?;
    gate.authorize(&principal)?;
    tracing::debug!(
        resource = %gate.requirement.resource,
        action = %gate.requirement.action,
        principal = %principal.id,
        "authorized"
    );
    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(AccessToken(token));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(rule: Option<AccessRule>) -> AuthGate {
        AuthGate::new(
            Arc::new(StaticTokenResolver::new()),
            AuthRequirement {
                resource: "user".into(),
                action: AccessAction::Delete,
                rule,
            },
        )
    }

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            id: json!(1),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn no_rule_admits_any_principal() {
        assert!(gate(None).authorize(&principal(&[])).is_ok());
    }

    #[test]
    fn role_mismatch_uses_rule_message() {
        let rule = AccessRule {
            roles: vec!["admin".into()],
            name: None,
            description: None,
            error_message: Some("admins only".into()),
        };
        let g = gate(Some(rule));
        assert!(g.authorize(&principal(&["admin", "staff"])).is_ok());
        let err = g.authorize(&principal(&["staff"])).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m == "admins only"));
    }

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
