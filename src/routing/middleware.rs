//! Interceptors and the middleware composer that flattens them into per-route chains.

use crate::controller::{Endpoint, RequestContext};
use crate::error::{AppError, ConfigError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What the chain does after an interceptor returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Next,
    /// Stop here and send `ctx.result` (204 when unset).
    Halt,
}

/// User code spliced before, after or on error of a generic operation.
///
/// After-interceptors see the generic handler's `ctx.result`; on-error interceptors see
/// `ctx.error` and may recover by taking it and setting `ctx.result`.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<Flow, AppError>;
}

struct FnInterceptor<F>(F);

#[async_trait]
impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut RequestContext) -> Result<Flow, AppError> + Send + Sync,
{
    async fn handle(&self, ctx: &mut RequestContext) -> Result<Flow, AppError> {
        (self.0)(ctx)
    }
}

/// Wrap a synchronous closure as an interceptor.
pub fn interceptor_fn<F>(f: F) -> Arc<dyn Interceptor>
where
    F: Fn(&mut RequestContext) -> Result<Flow, AppError> + Send + Sync + 'static,
{
    Arc::new(FnInterceptor(f))
}

#[derive(Clone)]
pub enum InterceptorEntry {
    Handler(Arc<dyn Interceptor>),
    /// Resolved against the assembly's `InterceptorRegistry`.
    Named(String),
}

impl fmt::Debug for InterceptorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorEntry::Handler(_) => f.write_str("Handler(..)"),
            InterceptorEntry::Named(n) => write!(f, "Named({})", n),
        }
    }
}

/// One function or an ordered sequence of functions.
#[derive(Clone, Debug)]
pub enum InterceptorValue {
    Single(InterceptorEntry),
    Sequence(Vec<InterceptorEntry>),
}

impl InterceptorValue {
    /// JSON form: a registered name or a list of names.
    pub fn from_json(model: &str, slot: &str, v: &Value) -> Result<InterceptorValue, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidInterceptor {
            model: model.to_string(),
            slot: slot.to_string(),
            reason,
        };
        match v {
            Value::String(name) => Ok(InterceptorValue::Single(InterceptorEntry::Named(name.clone()))),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(name) => Ok(InterceptorEntry::Named(name.clone())),
                    other => Err(invalid(format!("element {} is not an interceptor reference: {}", i, other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(InterceptorValue::Sequence),
            other => Err(invalid(format!("expected a name or a list of names, got {}", other))),
        }
    }
}

impl From<Arc<dyn Interceptor>> for InterceptorValue {
    fn from(i: Arc<dyn Interceptor>) -> Self {
        InterceptorValue::Single(InterceptorEntry::Handler(i))
    }
}

impl From<Vec<Arc<dyn Interceptor>>> for InterceptorValue {
    fn from(v: Vec<Arc<dyn Interceptor>>) -> Self {
        InterceptorValue::Sequence(v.into_iter().map(InterceptorEntry::Handler).collect())
    }
}

impl From<&str> for InterceptorValue {
    fn from(name: &str) -> Self {
        InterceptorValue::Single(InterceptorEntry::Named(name.to_string()))
    }
}

/// Interceptors addressable by name from component files.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    named: HashMap<String, Arc<dyn Interceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, interceptor: Arc<dyn Interceptor>) {
        self.named.insert(name.into(), interceptor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Interceptor>> {
        self.named.get(name).cloned()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Before,
    After,
    OnError,
}

pub fn slot_name(kind: SlotKind, endpoint: Endpoint) -> String {
    match kind {
        SlotKind::Before => format!("before{}", endpoint.pascal_name()),
        SlotKind::After => format!("after{}", endpoint.pascal_name()),
        SlotKind::OnError => format!("on{}Error", endpoint.pascal_name()),
    }
}

pub fn parse_slot(slot: &str) -> Option<(SlotKind, Endpoint)> {
    if let Some(rest) = slot.strip_prefix("before") {
        return Endpoint::from_pascal_name(rest).map(|e| (SlotKind::Before, e));
    }
    if let Some(rest) = slot.strip_prefix("after") {
        return Endpoint::from_pascal_name(rest).map(|e| (SlotKind::After, e));
    }
    slot.strip_prefix("on")
        .and_then(|r| r.strip_suffix("Error"))
        .and_then(Endpoint::from_pascal_name)
        .map(|e| (SlotKind::OnError, e))
}

/// Flatten one slot's value into an ordered list. Unresolvable names fail here, at assembly.
pub fn compose(
    model: &str,
    slot: &str,
    value: Option<&InterceptorValue>,
    registry: &InterceptorRegistry,
) -> Result<Vec<Arc<dyn Interceptor>>, ConfigError> {
    let entries: Vec<&InterceptorEntry> = match value {
        None => return Ok(Vec::new()),
        Some(InterceptorValue::Single(e)) => vec![e],
        Some(InterceptorValue::Sequence(list)) => list.iter().collect(),
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            InterceptorEntry::Handler(h) => Ok(h.clone()),
            InterceptorEntry::Named(name) => registry.get(name).ok_or_else(|| ConfigError::InvalidInterceptor {
                model: model.to_string(),
                slot: slot.to_string(),
                reason: format!("element {}: no interceptor registered as '{}'", i, name),
            }),
        })
        .collect()
}

/// The user-supplied parts of one route's chain:
/// `[query options, ...before, generic handler, ...after, send, ...on_error]`.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    pub before: Vec<Arc<dyn Interceptor>>,
    pub after: Vec<Arc<dyn Interceptor>>,
    pub on_error: Vec<Arc<dyn Interceptor>>,
}

impl MiddlewareChain {
    pub fn for_endpoint(
        model: &str,
        endpoint: Endpoint,
        interceptors: &HashMap<String, InterceptorValue>,
        registry: &InterceptorRegistry,
    ) -> Result<MiddlewareChain, ConfigError> {
        let slot = |kind| {
            let name = slot_name(kind, endpoint);
            compose(model, &name, interceptors.get(&name), registry)
        };
        Ok(MiddlewareChain {
            before: slot(SlotKind::Before)?,
            after: slot(SlotKind::After)?,
            on_error: slot(SlotKind::OnError)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.on_error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop() -> Arc<dyn Interceptor> {
        interceptor_fn(|_ctx: &mut RequestContext| Ok(Flow::Next))
    }

    #[test]
    fn compose_shapes() {
        let reg = InterceptorRegistry::new();
        assert!(compose("User", "beforeFindMany", None, &reg).unwrap().is_empty());
        let single: InterceptorValue = noop().into();
        assert_eq!(compose("User", "beforeFindMany", Some(&single), &reg).unwrap().len(), 1);
        let seq: InterceptorValue = vec![noop(), noop(), noop()].into();
        assert_eq!(compose("User", "beforeFindMany", Some(&seq), &reg).unwrap().len(), 3);
    }

    #[test]
    fn unresolved_name_fails_fast() {
        let mut reg = InterceptorRegistry::new();
        reg.register("audit", noop());
        let value = InterceptorValue::from_json("User", "afterCreateOne", &json!(["audit", "missing"])).unwrap();
        let err = compose("User", "afterCreateOne", Some(&value), &reg).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidInterceptor { ref slot, .. } if slot == "afterCreateOne"));
    }

    #[test]
    fn non_reference_elements_are_config_errors() {
        let err = InterceptorValue::from_json("User", "beforeFindOne", &json!(["ok", 42])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidInterceptor { .. }));
        assert!(InterceptorValue::from_json("User", "beforeFindOne", &json!({"a": 1})).is_err());
    }

    #[test]
    fn slot_names_round_trip() {
        for e in Endpoint::ALL {
            for kind in [SlotKind::Before, SlotKind::After, SlotKind::OnError] {
                assert_eq!(parse_slot(&slot_name(kind, e)), Some((kind, e)));
            }
        }
        assert_eq!(parse_slot("afterUpsert"), None);
        assert_eq!(slot_name(SlotKind::OnError, Endpoint::DeleteOne), "onDeleteOneError");
    }
}
