//! Standard response envelopes.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
}

/// `{data}` with 200, for typed payloads.
pub fn success_ok<T: Serialize>(data: T) -> (StatusCode, Json<SuccessOne<T>>) {
    (StatusCode::OK, Json(SuccessOne { data }))
}

pub fn single(record: Value) -> Value {
    json!({ "data": record })
}

/// List envelope: `total` counts every match, `results` only this page.
pub fn paginated(total: u64, data: Vec<Value>) -> Value {
    json!({ "total": total, "results": data.len(), "data": data })
}

pub fn bulk_count(count: u64) -> Value {
    json!({ "results": count, "data": { "count": count } })
}

pub fn batch(rows: Vec<Value>) -> Value {
    json!({ "results": rows.len(), "data": rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes() {
        assert_eq!(paginated(7, vec![json!(1), json!(2)]), json!({"total": 7, "results": 2, "data": [1, 2]}));
        assert_eq!(bulk_count(3), json!({"results": 3, "data": {"count": 3}}));
        assert_eq!(batch(vec![]), json!({"results": 0, "data": []}));
    }
}
