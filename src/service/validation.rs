//! Request body validation: declarative rule sets (schema mode) and typed DTOs (dto mode).

use crate::config::ValidationRule;
use crate::error::{AppError, FieldError};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Validates one JSON object body. Bulk bodies are validated element by element.
pub trait BodyValidator: Send + Sync {
    fn validate(&self, body: &Map<String, Value>) -> Result<(), AppError>;
}

/// Rule set keyed by field. Partial validators (update) skip `required` for absent fields.
#[derive(Clone, Debug)]
pub struct SchemaValidator {
    rules: HashMap<String, ValidationRule>,
    compiled: HashMap<String, Regex>,
    partial: bool,
}

impl SchemaValidator {
    pub fn new(rules: HashMap<String, ValidationRule>) -> Result<Self, crate::error::ConfigError> {
        let mut compiled = HashMap::new();
        for (field, rule) in &rules {
            if let Some(pattern) = &rule.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    crate::error::ConfigError::Validation(format!("invalid pattern for {}: {}", field, e))
                })?;
                compiled.insert(field.clone(), re);
            }
        }
        Ok(SchemaValidator {
            rules,
            compiled,
            partial: false,
        })
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

impl BodyValidator for SchemaValidator {
    fn validate(&self, body: &Map<String, Value>) -> Result<(), AppError> {
        let mut errors = Vec::new();
        let mut fields: Vec<&String> = self.rules.keys().collect();
        fields.sort();
        for field in fields {
            let rule = &self.rules[field];
            match body.get(field.as_str()) {
                None | Some(Value::Null) => {
                    if rule.required == Some(true) && !(self.partial && body.get(field.as_str()).is_none()) {
                        errors.push(FieldError {
                            field: field.clone(),
                            message: format!("{} is required", field),
                        });
                    }
                }
                Some(v) => validate_field(field, v, rule, self.compiled.get(field.as_str()), &mut errors),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationFailed(errors))
        }
    }
}

fn validate_field(col: &str, v: &Value, rule: &ValidationRule, pattern: Option<&Regex>, errors: &mut Vec<FieldError>) {
    let mut fail = |message: String| {
        errors.push(FieldError {
            field: col.to_string(),
            message,
        })
    };
    if let Some(format) = &rule.format {
        if let Some(msg) = check_format(col, v, format) {
            fail(msg);
        }
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                fail(format!("{} must be at most {} characters", col, max));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                fail(format!("{} must be at least {} characters", col, min));
            }
        }
        if let Some(re) = pattern {
            if !re.is_match(s) {
                fail(format!("{} does not match required pattern", col));
            }
        }
    }
    if let Some(allowed) = &rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            fail(format!(
                "{} must be one of: {:?}",
                col,
                allowed.iter().take(5).collect::<Vec<_>>()
            ));
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                fail(format!("{} must be at least {}", col, min));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                fail(format!("{} must be at most {}", col, max));
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn check_format(col: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" => {
            let ok = s
                .split_once('@')
                .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
                .unwrap_or(false);
            (!ok).then(|| format!("{} must be a valid email", col))
        }
        "uuid" => uuid::Uuid::parse_str(s)
            .is_err()
            .then(|| format!("{} must be a valid UUID", col)),
        "date-time" | "datetime" => chrono::DateTime::parse_from_rfc3339(s)
            .is_err()
            .then(|| format!("{} must be an RFC 3339 timestamp", col)),
        _ => None,
    }
}

type Check<T> = Box<dyn Fn(&T) -> Vec<FieldError> + Send + Sync>;

/// Validation by deserializing into `T`, plus optional field checks on the typed value.
pub struct TypedDto<T> {
    check: Option<Check<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedDto<T> {
    pub fn new() -> Self {
        TypedDto {
            check: None,
            _marker: PhantomData,
        }
    }

    pub fn with_check(mut self, check: impl Fn(&T) -> Vec<FieldError> + Send + Sync + 'static) -> Self {
        self.check = Some(Box::new(check));
        self
    }
}

impl<T: DeserializeOwned> Default for TypedDto<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedDto<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedDto")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> BodyValidator for TypedDto<T> {
    fn validate(&self, body: &Map<String, Value>) -> Result<(), AppError> {
        let dto: T = serde_json::from_value(Value::Object(body.clone())).map_err(|e| {
            AppError::ValidationFailed(vec![FieldError {
                field: serde_field(&e.to_string()).unwrap_or_else(|| "body".into()),
                message: e.to_string(),
            }])
        })?;
        let errors = self.check.as_ref().map(|c| c(&dto)).unwrap_or_default();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationFailed(errors))
        }
    }
}

/// Field name out of serde messages such as "missing field `name`".
fn serde_field(msg: &str) -> Option<String> {
    let start = msg.find('`')? + 1;
    let len = msg[start..].find('`')?;
    Some(msg[start..start + len].to_string())
}

/// Validate a body that may be one object or an array of objects.
pub fn validate_body(validator: &dyn BodyValidator, body: &Value) -> Result<(), AppError> {
    match body {
        Value::Object(m) => validator.validate(m),
        Value::Array(items) => {
            let mut errors = Vec::new();
            for (i, item) in items.iter().enumerate() {
                let Value::Object(m) = item else {
                    errors.push(FieldError {
                        field: format!("[{}]", i),
                        message: "must be an object".into(),
                    });
                    continue;
                };
                if let Err(AppError::ValidationFailed(item_errors)) = validator.validate(m) {
                    errors.extend(item_errors.into_iter().map(|e| FieldError {
                        field: format!("[{}].{}", i, e.field),
                        message: e.message,
                    }));
                }
            }
            if errors.is_empty() {
                Ok(())
            } else {
                Err(AppError::ValidationFailed(errors))
            }
        }
        _ => Err(AppError::validation("body", "must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn rules() -> HashMap<String, ValidationRule> {
        serde_json::from_value(json!({
            "name": {"required": true, "minLength": 2},
            "email": {"required": true, "format": "email"},
            "age": {"minimum": 0, "maximum": 150},
            "role": {"allowed": ["admin", "user"]}
        }))
        .unwrap()
    }

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn collects_every_field_error() {
        let v = SchemaValidator::new(rules()).unwrap();
        let err = v.validate(&obj(json!({"name": "A", "age": 200, "role": "root"}))).unwrap_err();
        let AppError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["age", "email", "name", "role"]);
    }

    #[test]
    fn partial_skips_missing_required_fields() {
        let v = SchemaValidator::new(rules()).unwrap().partial();
        assert!(v.validate(&obj(json!({"age": 3}))).is_ok());
        assert!(v.validate(&obj(json!({"email": "nope"}))).is_err());
        assert!(v.validate(&obj(json!({"name": null}))).is_err());
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let rules: HashMap<String, ValidationRule> =
            serde_json::from_value(json!({"code": {"pattern": "("}})).unwrap();
        assert!(SchemaValidator::new(rules).is_err());
    }

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct CreateUser {
        name: String,
        age: Option<u32>,
    }

    #[test]
    fn typed_dto_reports_missing_field() {
        let v = TypedDto::<CreateUser>::new();
        assert!(v.validate(&obj(json!({"name": "A"}))).is_ok());
        let err = v.validate(&obj(json!({"age": 3}))).unwrap_err();
        let AppError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
        assert_eq!(errors[0].field, "name");
    }

    #[test]
    fn typed_dto_checks_run_on_typed_value() {
        let v = TypedDto::<CreateUser>::new().with_check(|u| {
            if u.name.trim().is_empty() {
                vec![FieldError { field: "name".into(), message: "must not be blank".into() }]
            } else {
                vec![]
            }
        });
        assert!(v.validate(&obj(json!({"name": " "}))).is_err());
    }

    #[test]
    fn array_bodies_prefix_item_index() {
        let v = SchemaValidator::new(rules()).unwrap();
        let err = validate_body(&v, &json!([{"name": "Ann", "email": "a@b.co"}, {"name": "Bo"}])).unwrap_err();
        let AppError::ValidationFailed(errors) = err else { panic!("expected validation failure") };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "[1].email");
    }
}
