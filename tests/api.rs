//! End-to-end tests: assemble the router over the in-memory store and drive it with requests.

use axum::{
    body::{to_bytes, Body},
    extract::Path,
    http::{header, Method, Request, StatusCode},
    Json, Router,
};
use crudforge::config::{AuthConfigs, ComponentRegistry, DisableConfig, EndpointSelection, ParentConfig, RouterConfig};
use crudforge::controller::PipelineResult;
use crudforge::error::AppError;
use crudforge::{
    interceptor_fn, ConfigError, CustomRouter, Flow, MemoryOrm, ModuleComponents, Principal, RequestContext,
    RouterAssembly, Settings, StaticModelProvider, StaticTokenResolver, ValidationMode,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SCHEMA: &str = r#"[
  {
    "name": "User",
    "fields": [
      {"name": "id", "kind": "int", "isId": true},
      {"name": "email", "kind": "string"},
      {"name": "name", "kind": "string"},
      {"name": "age", "kind": "int"}
    ],
    "relations": [
      {"name": "posts", "targetTypeName": "Post", "foreignKeyField": "userId", "isArray": true}
    ]
  },
  {
    "name": "Post",
    "fields": [
      {"name": "id", "kind": "int", "isId": true},
      {"name": "title", "kind": "string"},
      {"name": "userId", "kind": "int"}
    ]
  }
]"#;

fn assembly(registry: ComponentRegistry) -> RouterAssembly {
    let provider = StaticModelProvider::from_json(SCHEMA).unwrap();
    let orm = MemoryOrm::new(provider.models().to_vec());
    RouterAssembly::new(Arc::new(orm), Arc::new(provider)).loader(Arc::new(registry))
}

async fn app(registry: ComponentRegistry) -> Router {
    assembly(registry).build().await.unwrap().router
}

async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed_users(app: &Router) {
    for (name, age) in [("ann", 30), ("bob", 40), ("cy", 30)] {
        let (status, _) = call(
            app,
            Method::POST,
            "/users",
            None,
            Some(json!({"email": format!("{}@example.com", name), "name": name, "age": age})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

#[tokio::test]
async fn create_then_read() {
    let app = app(ComponentRegistry::new()).await;
    let (status, body) = call(&app, Method::POST, "/users", None, Some(json!({"name": "ann", "age": 30}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].clone();
    assert_eq!(body["data"]["name"], "ann");

    let (status, body) = call(&app, Method::GET, &format!("/users/{}", id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["age"], 30);
}

#[tokio::test]
async fn list_paginates_sorts_and_filters() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::GET, "/users?sort=-age&limit=2&page=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["results"], 2);
    assert_eq!(body["data"][0]["name"], "bob");

    let (_, body) = call(&app, Method::GET, "/users?limit=2&page=2", None, None).await;
    assert_eq!(body["results"], 1);

    let (_, body) = call(&app, Method::GET, "/users?age=30&fields=name", None, None).await;
    assert_eq!(body["total"], 2);
    assert!(body["data"][0].get("email").is_none());

    let (_, body) = call(&app, Method::GET, "/users?age__gte=35", None, None).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn deprecated_projection_params_fail_loudly() {
    let app = app(ComponentRegistry::new()).await;
    let (status, _) = call(&app, Method::GET, "/users?addFields=name", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_mutations_require_an_and_filter() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::PATCH, "/users/many", None, Some(json!({"age": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_request_query_parameters");

    let (status, body) = call(&app, Method::DELETE, "/users/many?age=30&filterMode=OR", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_filter_mode");

    let (status, body) = call(&app, Method::PATCH, "/users/many?age=30", None, Some(json!({"age": 31}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"results": 2, "data": {"count": 2}}));

    let (status, body) = call(&app, Method::DELETE, "/users/many?age=99", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "no_records_affected");

    let (_, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn search_alone_scopes_a_bulk_delete() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::DELETE, "/users/many?search=ann", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 1);

    let (_, body) = call(&app, Method::GET, "/users?sort=name", None, None).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["data"][0]["name"], "bob");

    let (status, body) = call(&app, Method::DELETE, "/users/many?search=", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_request_query_parameters");
}

#[tokio::test]
async fn out_of_range_pages_are_a_bad_request() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::GET, "/users?page=18446744073709551615&limit=30", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(body["error"]["message"], "bad request: page out of range");
}

#[tokio::test]
async fn create_many_needs_a_non_empty_array() {
    let app = app(ComponentRegistry::new()).await;
    let (status, body) = call(&app, Method::POST, "/users/many", None, Some(json!({"name": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_array_request_body");

    let (status, body) = call(&app, Method::POST, "/users/many", None, Some(json!([{"name": "a"}, {"name": "b"}]))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["count"], 2);
}

#[tokio::test]
async fn not_found_messages() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::GET, "/users/99", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "User with ID 99 not found");

    let (status, body) = call(&app, Method::GET, "/users/1?age=40", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "User not found");

    let (status, _) = call(&app, Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::PATCH, "/users/42", None, Some(json!({"age": 1}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_one_answers_204_without_body() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;
    let (status, body) = call(&app, Method::DELETE, "/users/2", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    let (status, _) = call(&app, Method::GET, "/users/2", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_json_body_is_a_bad_request() {
    let app = app(ComponentRegistry::new()).await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{oops"))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_update_and_delete() {
    let app = app(ComponentRegistry::new()).await;
    seed_users(&app).await;

    let (status, body) = call(
        &app,
        Method::PATCH,
        "/users/batch",
        None,
        Some(json!([{"id": 1, "name": "ann2"}, {"id": 3, "name": "cy2"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 2);

    let (_, body) = call(&app, Method::GET, "/users/3", None, None).await;
    assert_eq!(body["data"]["name"], "cy2");

    let (status, body) = call(&app, Method::DELETE, "/users/batch", None, Some(json!([]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "missing_array_request_body");

    let (status, body) = call(&app, Method::DELETE, "/users/batch", None, Some(json!([{"id": 1}, 2]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], 2);
    let (_, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn after_interceptors_see_and_replace_the_result() {
    let registry = ComponentRegistry::new().register(
        "user",
        ModuleComponents::new()
            .with_interceptor(
                "afterFindMany",
                interceptor_fn(|ctx: &mut RequestContext| {
                    if let Some(body) = ctx.result.as_mut().and_then(|r| r.body.as_mut()) {
                        body["intercepted"] = json!(true);
                    }
                    Ok(Flow::Next)
                }),
            )
            .with_interceptor(
                "afterDeleteOne",
                interceptor_fn(|ctx: &mut RequestContext| {
                    let deleted = ctx.result.as_mut().and_then(|r| r.additional_data.take());
                    if let Some(deleted) = deleted {
                        ctx.result = Some(PipelineResult::json(StatusCode::OK, json!({"deleted": deleted})));
                    }
                    Ok(Flow::Next)
                }),
            ),
    );
    let app = app(registry).await;
    seed_users(&app).await;

    let (_, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(body["intercepted"], true);
    assert_eq!(body["total"], 3);

    let (status, body) = call(&app, Method::DELETE, "/users/1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["name"], "ann");
}

#[tokio::test]
async fn before_interceptor_can_halt_and_on_error_can_recover() {
    let registry = ComponentRegistry::new().register(
        "user",
        ModuleComponents::new()
            .with_interceptor(
                "beforeCreateOne",
                interceptor_fn(|ctx: &mut RequestContext| {
                    if ctx.body.get("name").and_then(Value::as_str) == Some("queued") {
                        ctx.result = Some(PipelineResult::json(StatusCode::ACCEPTED, json!({"queued": true})));
                        return Ok(Flow::Halt);
                    }
                    Ok(Flow::Next)
                }),
            )
            .with_interceptor(
                "onFindOneError",
                interceptor_fn(|ctx: &mut RequestContext| {
                    if matches!(ctx.error, Some(AppError::NotFound(_))) {
                        ctx.error = None;
                        ctx.result = Some(PipelineResult::json(StatusCode::OK, json!({"data": null})));
                    }
                    Ok(Flow::Next)
                }),
            ),
    );
    let app = app(registry).await;

    let (status, body) = call(&app, Method::POST, "/users", None, Some(json!({"name": "queued"}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], true);
    let (_, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(body["total"], 0);

    let (status, body) = call(&app, Method::GET, "/users/7", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": null}));
}

#[tokio::test]
async fn named_interceptors_resolve_at_assembly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("user.json"), r#"{"interceptors": {"afterFindMany": ["tag"]}}"#).unwrap();

    let err = assembly(ComponentRegistry::from_dir(dir.path())).build().await.err().unwrap();
    assert!(matches!(err, ConfigError::InvalidInterceptor { .. }));

    let app = assembly(ComponentRegistry::from_dir(dir.path()))
        .interceptor(
            "tag",
            interceptor_fn(|ctx: &mut RequestContext| {
                ctx.locals.insert("tagged".into(), json!(true));
                if let Some(body) = ctx.result.as_mut().and_then(|r| r.body.as_mut()) {
                    body["tag"] = json!("named");
                }
                Ok(Flow::Next)
            }),
        )
        .build()
        .await
        .unwrap()
        .router;
    let (_, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(body["tag"], "named");
}

async fn custom_find(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"custom": id}))
}

#[tokio::test]
async fn custom_routes_win_over_generated_ones() {
    let registry = ComponentRegistry::new().register(
        "user",
        ModuleComponents::new().with_router(CustomRouter::new("users.rs").route(Method::GET, "/api/users/{id}/", custom_find)),
    );
    let app = app(registry).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::GET, "/users/1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"custom": "1"}));

    // Other verbs on the same path are still generated.
    let (status, _) = call(&app, Method::PATCH, "/users/1", None, Some(json!({"age": 5}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn disabled_endpoints_are_not_mounted() {
    let registry = ComponentRegistry::new().register(
        "user",
        ModuleComponents::new().with_router_config(RouterConfig {
            disable: DisableConfig::List(vec!["deleteMany".into(), "createMany".into()]),
            parent: None,
        }),
    );
    let app = app(registry).await;
    let (status, _) = call(&app, Method::DELETE, "/users/many?age=1", None, None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    // Still mounted; nothing matches in an empty table.
    let (_, body) = call(&app, Method::PATCH, "/users/many?age=1", None, Some(json!({"age": 2}))).await;
    assert_eq!(body["error"]["code"], "no_records_affected");
}

#[tokio::test]
async fn authentication_and_roles() {
    let auth: AuthConfigs = serde_json::from_value(json!({
        "authenticationControl": {"View": true},
        "accessControl": {"Delete": {"roles": ["admin"], "errorMessage": "admins only"}}
    }))
    .unwrap();
    let registry = ComponentRegistry::new().register("user", ModuleComponents::new().with_auth(auth));
    let resolver = StaticTokenResolver::new()
        .with_token("admin", Principal { id: json!(1), roles: vec!["admin".into()] })
        .with_token("member", Principal { id: json!(2), roles: vec!["member".into()] });
    let app = assembly(registry).resolver(Arc::new(resolver)).build().await.unwrap().router;

    let (status, body) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = call(&app, Method::GET, "/users", Some("stolen"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, Method::POST, "/users", Some("member"), Some(json!({"name": "ann"}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(&app, Method::DELETE, "/users/1", Some("member"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["message"], "admins only");

    let (status, _) = call(&app, Method::DELETE, "/users/1", Some("admin"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Reflection routes stay public.
    let (status, body) = call(&app, Method::GET, "/auth-actions", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let actions = body["data"].as_array().unwrap();
    assert_eq!(actions[0]["resource"], "all");
    let delete = actions
        .iter()
        .find(|a| a["action"] == "Delete" && a["resource"] == "user")
        .unwrap();
    assert_eq!(delete["roles"], json!(["admin"]));
    assert_eq!(actions.iter().filter(|a| a["resource"] == "user").count(), 4);
}

#[tokio::test]
async fn nested_routes_scope_by_parent() {
    let registry = ComponentRegistry::new().register(
        "post",
        ModuleComponents::new().with_router_config(RouterConfig {
            disable: DisableConfig::default(),
            parent: Some(ParentConfig {
                model: "User".into(),
                foreign_key: None,
                endpoints: EndpointSelection::List(vec!["createOne".into(), "findMany".into(), "findOne".into()]),
            }),
        }),
    );
    let app = app(registry).await;
    seed_users(&app).await;

    let (status, body) = call(&app, Method::POST, "/users/1/posts", None, Some(json!({"title": "first"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["userId"], 1);
    call(&app, Method::POST, "/users/2/posts", None, Some(json!({"title": "second"}))).await;

    let (_, body) = call(&app, Method::GET, "/users/1/posts", None, None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["title"], "first");

    let (status, _) = call(&app, Method::GET, "/users/2/posts/1", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::GET, "/users/1/posts/1", None, None).await;
    assert_eq!(status, StatusCode::OK);

    // Not whitelisted for the nested mount.
    let (status, _) = call(&app, Method::DELETE, "/users/1/posts/1", None, None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // The flat routes still see every post.
    let (_, body) = call(&app, Method::GET, "/posts", None, None).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn schema_validation_collects_field_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("user.json"),
        r#"{"schemas": {
            "create": {"email": {"required": true, "format": "email"}, "name": {"required": true}},
            "update": {"email": {"required": true, "format": "email"}}
        }}"#,
    )
    .unwrap();
    let mut settings = Settings::default();
    settings.validation = Some(ValidationMode::Schema);
    let app = assembly(ComponentRegistry::from_dir(dir.path()))
        .settings(settings)
        .build()
        .await
        .unwrap()
        .router;

    let (status, body) = call(&app, Method::POST, "/users", None, Some(json!({"email": "nope"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");
    assert_eq!(body["error"]["details"].as_array().unwrap().len(), 2);

    let (status, _) = call(
        &app,
        Method::POST,
        "/users",
        None,
        Some(json!({"email": "ann@example.com", "name": "ann"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Update rules are partial: absent fields are not required.
    let (status, _) = call(&app, Method::PATCH, "/users/1", None, Some(json!({"name": "ann2"}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reflection_routes_list_resources_and_routes() {
    let mut settings = Settings::default();
    settings.base_path = "/api".into();
    let app = assembly(ComponentRegistry::new()).settings(settings).build().await.unwrap().router;

    let (status, body) = call(&app, Method::GET, "/api/available-resources", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": ["user", "post"]}));

    let (_, body) = call(&app, Method::GET, "/api/route-manifest", None, None).await;
    let routes = body["data"].as_array().unwrap();
    assert!(routes
        .iter()
        .any(|r| r["method"] == "GET" && r["path"] == "/api/users/:id" && r["endpoint"] == "findOne"));

    let (status, _) = call(&app, Method::GET, "/users", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let mut settings = Settings::default();
    settings.body_limit = 32;
    let app = assembly(ComponentRegistry::new()).settings(settings).build().await.unwrap().router;
    let body = json!({"name": "x".repeat(100)}).to_string();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
