//! APIFeatures: translates a request query string into ORM filter, sort, projection and
//! pagination arguments. Each step writes a disjoint part of the result, so they chain in any order.

use super::operators::{clause, single};
use crate::config::Settings;
use crate::error::AppError;
use crate::model::ModelDescriptor;
use crate::orm::QueryOptions;
use serde_json::{Map, Value};

/// Query keys that steer the features instead of filtering.
pub const META_KEYS: &[&str] = &[
    "page",
    "sort",
    "limit",
    "fields",
    "search",
    "filterMode",
    "prismaQueryOptions",
    "addFields",
    "removeFields",
];

/// Largest `skip`/`take` a store accepts (PostgreSQL `LIMIT`/`OFFSET` are `bigint`).
pub const MAX_ROW_OFFSET: u64 = i64::MAX as u64;

const DEPRECATED_KEYS: &[&str] = &["addFields", "removeFields"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    And,
    Or,
}

impl FilterMode {
    pub fn parse(raw: &str) -> Result<FilterMode, AppError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(FilterMode::And),
            "OR" => Ok(FilterMode::Or),
            _ => Err(AppError::InvalidFilterMode(format!(
                "filterMode must be AND or OR, got '{}'",
                raw
            ))),
        }
    }

    fn key(self) -> &'static str {
        match self {
            FilterMode::And => "AND",
            FilterMode::Or => "OR",
        }
    }
}

fn query_value<'q>(query: &'q [(String, String)], key: &str) -> Option<&'q str> {
    query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

/// The explicitly requested filter mode, if any.
pub fn requested_filter_mode(query: &[(String, String)]) -> Result<Option<FilterMode>, AppError> {
    query_value(query, "filterMode").map(FilterMode::parse).transpose()
}

/// True when at least one query key is a real filter: a non-meta key, or a non-empty `search`.
pub fn has_filter_keys(query: &[(String, String)]) -> bool {
    query.iter().any(|(k, v)| match k.as_str() {
        "search" => !v.trim().is_empty(),
        k => !META_KEYS.contains(&k),
    })
}

/// `addFields`/`removeFields` conflicted with `fields` and are refused outright.
pub fn reject_deprecated(query: &[(String, String)]) -> Result<(), AppError> {
    match query.iter().find(|(k, _)| DEPRECATED_KEYS.contains(&k.as_str())) {
        Some((k, _)) => Err(AppError::BadRequest(format!(
            "'{}' is no longer supported; use 'fields' instead",
            k
        ))),
        None => Ok(()),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSettings {
    pub default_limit: u64,
    pub max_limit: Option<u64>,
    pub allow_dangerous_query_options: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        FeatureSettings::from(&Settings::default())
    }
}

impl From<&Settings> for FeatureSettings {
    fn from(s: &Settings) -> Self {
        FeatureSettings {
            default_limit: s.default_limit,
            max_limit: s.max_limit,
            allow_dangerous_query_options: s.allow_dangerous_query_options,
        }
    }
}

/// ORM arguments derived from one query string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComputedQuery {
    pub where_: Option<Value>,
    pub options: QueryOptions,
}

pub struct ApiFeatures<'a> {
    model: &'a ModelDescriptor,
    query: &'a [(String, String)],
    settings: &'a FeatureSettings,
    computed: ComputedQuery,
}

impl<'a> ApiFeatures<'a> {
    pub fn new(model: &'a ModelDescriptor, query: &'a [(String, String)], settings: &'a FeatureSettings) -> Self {
        ApiFeatures {
            model,
            query,
            settings,
            computed: ComputedQuery::default(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        query_value(self.query, key)
    }

    /// Non-meta pairs combined with `mode`; `search` adds an OR across string fields (ANDed in);
    /// `prismaQueryOptions` is merged only when dangerous options are allowed.
    pub fn filter(mut self, mode: FilterMode) -> Result<Self, AppError> {
        let mut clauses = Vec::new();
        for (k, v) in self.query {
            if META_KEYS.contains(&k.as_str()) {
                continue;
            }
            clauses.push(clause(self.model, k, v)?);
        }
        let mut where_ = match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(single(mode.key(), Value::Array(clauses))),
        };

        if let Some(term) = self.get("search").map(str::trim).filter(|s| !s.is_empty()) {
            let alternatives: Vec<Value> = self
                .model
                .search_fields()
                .map(|f| {
                    let mut cond = Map::new();
                    cond.insert("contains".into(), Value::String(term.to_string()));
                    cond.insert("mode".into(), Value::String("insensitive".into()));
                    single(&f.name, Value::Object(cond))
                })
                .collect();
            if !alternatives.is_empty() {
                let search = single("OR", Value::Array(alternatives));
                where_ = Some(match where_ {
                    None => search,
                    Some(w) => single("AND", Value::Array(vec![w, search])),
                });
            }
        }
        self.computed.where_ = where_;

        if let Some(raw) = self.get("prismaQueryOptions") {
            if self.settings.allow_dangerous_query_options {
                let extra: QueryOptions = serde_json::from_str(raw)
                    .map_err(|e| AppError::BadRequest(format!("invalid prismaQueryOptions: {}", e)))?;
                self.computed.options = std::mem::take(&mut self.computed.options).layer(extra);
            } else {
                tracing::warn!(
                    model = %self.model.name,
                    "ignoring prismaQueryOptions: dangerous query options are disabled"
                );
            }
        }
        Ok(self)
    }

    /// `sort=-createdAt,name` -> `[{createdAt: desc}, {name: asc}]`.
    pub fn sort(mut self) -> Result<Self, AppError> {
        let Some(raw) = self.get("sort") else {
            return Ok(self);
        };
        let mut order = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (field, dir) = match part.strip_prefix('-') {
                Some(f) => (f, "desc"),
                None => (part.strip_prefix('+').unwrap_or(part), "asc"),
            };
            if self.model.field(field).is_none() {
                return Err(AppError::BadRequest(format!("unknown sort field '{}'", field)));
            }
            order.push(single(field, Value::String(dir.into())));
        }
        if !order.is_empty() {
            self.computed.options.order_by = Some(order);
        }
        Ok(self)
    }

    /// `fields=a,b` -> `select {id, a, b}`. Relation names are selectable too.
    pub fn limit_fields(mut self) -> Result<Self, AppError> {
        reject_deprecated(self.query)?;
        let Some(raw) = self.get("fields") else {
            return Ok(self);
        };
        let mut select = Map::new();
        select.insert(self.model.id_field().to_string(), Value::Bool(true));
        for field in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if self.model.field(field).is_none() && self.model.relation(field).is_none() {
                return Err(AppError::BadRequest(format!("unknown field '{}' in fields", field)));
            }
            select.insert(field.to_string(), Value::Bool(true));
        }
        self.computed.options.select = Some(select);
        Ok(self)
    }

    /// 1-indexed `page` and `limit` -> `skip = (page - 1) * limit`, `take = limit`.
    pub fn paginate(mut self) -> Result<Self, AppError> {
        let page = parse_positive(self.get("page"), "page", 1)?;
        let mut limit = parse_positive(self.get("limit"), "limit", self.settings.default_limit)?;
        if let Some(max) = self.settings.max_limit {
            limit = limit.min(max);
        }
        let skip = (page - 1)
            .checked_mul(limit)
            .filter(|skip| *skip <= MAX_ROW_OFFSET && limit <= MAX_ROW_OFFSET)
            .ok_or_else(|| AppError::BadRequest("page out of range".into()))?;
        self.computed.options.skip = Some(skip);
        self.computed.options.take = Some(limit);
        Ok(self)
    }

    pub fn finish(self) -> ComputedQuery {
        self.computed
    }
}

fn parse_positive(raw: Option<&str>, key: &str, default: u64) -> Result<u64, AppError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(AppError::BadRequest(format!("{} must be a positive integer", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldMeta, RelationFields};
    use serde_json::json;

    fn user() -> ModelDescriptor {
        ModelDescriptor::new(
            "User",
            vec![
                FieldMeta { name: "id".into(), kind: FieldKind::Int, is_id: true },
                FieldMeta { name: "name".into(), kind: FieldKind::String, is_id: false },
                FieldMeta { name: "email".into(), kind: FieldKind::String, is_id: false },
                FieldMeta { name: "age".into(), kind: FieldKind::Int, is_id: false },
                FieldMeta { name: "createdAt".into(), kind: FieldKind::DateTime, is_id: false },
            ],
            RelationFields::default(),
        )
    }

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn default_pagination() {
        let model = user();
        let settings = FeatureSettings::default();
        let query = q(&[]);
        let c = ApiFeatures::new(&model, &query, &settings).paginate().unwrap().finish();
        assert_eq!(c.options.skip, Some(0));
        assert_eq!(c.options.take, Some(30));
    }

    #[test]
    fn pagination_formula_and_cap() {
        let model = user();
        let settings = FeatureSettings {
            max_limit: Some(50),
            ..FeatureSettings::default()
        };
        let query = q(&[("page", "3"), ("limit", "10")]);
        let c = ApiFeatures::new(&model, &query, &settings).paginate().unwrap().finish();
        assert_eq!((c.options.skip, c.options.take), (Some(20), Some(10)));

        let query = q(&[("limit", "500")]);
        let c = ApiFeatures::new(&model, &query, &settings).paginate().unwrap().finish();
        assert_eq!(c.options.take, Some(50));

        let query = q(&[("page", "0")]);
        assert!(ApiFeatures::new(&model, &query, &settings).paginate().is_err());
    }

    #[test]
    fn huge_pages_are_a_bad_request() {
        let model = user();
        let settings = FeatureSettings::default();
        for page in ["18446744073709551615", "9223372036854775807"] {
            let query = q(&[("page", page), ("limit", "30")]);
            let err = ApiFeatures::new(&model, &query, &settings).paginate().err().unwrap();
            assert!(matches!(err, AppError::BadRequest(ref m) if m == "page out of range"));
        }

        let query = q(&[("limit", "18446744073709551615")]);
        assert!(ApiFeatures::new(&model, &query, &settings).paginate().is_err());

        let query = q(&[("page", "2"), ("limit", "4611686018427387903")]);
        let c = ApiFeatures::new(&model, &query, &settings).paginate().unwrap().finish();
        assert_eq!(c.options.skip, Some(4611686018427387903));
    }

    #[test]
    fn search_counts_as_a_filter() {
        assert!(has_filter_keys(&q(&[("search", "ann")])));
        assert!(!has_filter_keys(&q(&[("search", "  "), ("filterMode", "AND")])));
        assert!(!has_filter_keys(&q(&[("page", "1"), ("prismaQueryOptions", "{}")])));
        assert!(has_filter_keys(&q(&[("name", "A"), ("filterMode", "AND")])));
    }

    #[test]
    fn sort_directions() {
        let model = user();
        let settings = FeatureSettings::default();
        let query = q(&[("sort", "-createdAt,name")]);
        let c = ApiFeatures::new(&model, &query, &settings).sort().unwrap().finish();
        assert_eq!(c.options.order_by, Some(vec![json!({"createdAt": "desc"}), json!({"name": "asc"})]));
    }

    #[test]
    fn filter_defaults_to_or_and_ands_search() {
        let model = user();
        let settings = FeatureSettings::default();
        let query = q(&[("name", "A"), ("age", "3"), ("search", "x"), ("page", "2")]);
        let c = ApiFeatures::new(&model, &query, &settings)
            .filter(FilterMode::Or)
            .unwrap()
            .finish();
        assert_eq!(
            c.where_,
            Some(json!({"AND": [
                {"OR": [{"name": "A"}, {"age": 3}]},
                {"OR": [
                    {"name": {"contains": "x", "mode": "insensitive"}},
                    {"email": {"contains": "x", "mode": "insensitive"}}
                ]}
            ]}))
        );
    }

    #[test]
    fn dangerous_options_are_gated() {
        let model = user();
        let query = q(&[("prismaQueryOptions", r#"{"take": 1}"#)]);
        let closed = FeatureSettings::default();
        let c = ApiFeatures::new(&model, &query, &closed).filter(FilterMode::And).unwrap().finish();
        assert_eq!(c.options.take, None);

        let open = FeatureSettings {
            allow_dangerous_query_options: true,
            ..FeatureSettings::default()
        };
        let c = ApiFeatures::new(&model, &query, &open).filter(FilterMode::And).unwrap().finish();
        assert_eq!(c.options.take, Some(1));
    }

    #[test]
    fn fields_select_and_deprecated_params() {
        let model = user();
        let settings = FeatureSettings::default();
        let query = q(&[("fields", "name")]);
        let c = ApiFeatures::new(&model, &query, &settings).limit_fields().unwrap().finish();
        assert_eq!(c.options.select.map(Value::Object), Some(json!({"id": true, "name": true})));

        let query = q(&[("addFields", "name")]);
        assert!(matches!(
            ApiFeatures::new(&model, &query, &settings).limit_fields().err(),
            Some(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn filter_mode_and_filter_key_detection() {
        assert_eq!(requested_filter_mode(&q(&[("filterMode", "or")])).unwrap(), Some(FilterMode::Or));
        assert!(requested_filter_mode(&q(&[("filterMode", "XOR")])).is_err());
        assert!(!has_filter_keys(&q(&[("filterMode", "AND"), ("prismaQueryOptions", "{}")])));
        assert!(has_filter_keys(&q(&[("filterMode", "AND"), ("name", "A")])));
    }
}
