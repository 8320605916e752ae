//! Demo server: in-memory store, models from demos/schema.json, components from
//! demos/components (or CRUDFORGE_COMPONENTS_DIR), and a static token table.

use axum::{http::Method, Json};
use crudforge::{
    interceptor_fn, CustomRouter, Flow, MemoryOrm, ModuleComponents, Principal, RouterAssembly, Settings,
    StaticModelProvider, StaticTokenResolver,
};
use crudforge::config::ComponentRegistry;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

async fn user_stats() -> Json<serde_json::Value> {
    Json(json!({ "data": { "source": "custom router" } }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crudforge=info".parse()?))
        .init();

    let mut settings = Settings::from_env()?;
    let components_dir = settings
        .components_dir
        .get_or_insert_with(|| concat!(env!("CARGO_MANIFEST_DIR"), "/demos/components").into())
        .clone();
    let schema_path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/schema.json"));
    let schema = crudforge::config::read_schema(schema_path).await?;
    let provider = StaticModelProvider::from_json(&schema)?;
    let orm = MemoryOrm::new(provider.models().to_vec());

    let resolver = StaticTokenResolver::new()
        .with_token("admin-token", Principal { id: json!(1), roles: vec!["admin".into()] })
        .with_token("user-token", Principal { id: json!(2), roles: vec!["member".into()] });

    let registry = ComponentRegistry::from_dir(components_dir).register(
        "user",
        ModuleComponents::new().with_router(CustomRouter::new("demos/server.rs").route(Method::GET, "/users/stats", user_stats)),
    );

    let app = RouterAssembly::new(Arc::new(orm), Arc::new(provider))
        .settings(settings)
        .loader(Arc::new(registry))
        .resolver(Arc::new(resolver))
        .interceptor(
            "stamp-served-by",
            interceptor_fn(|ctx| {
                if let Some(body) = ctx.result.as_mut().and_then(|r| r.body.as_mut()) {
                    body["servedBy"] = json!("crudforge-demo");
                }
                Ok(Flow::Next)
            }),
        )
        .build()
        .await?;

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    tracing::info!("listening on {} ({} routes)", listener.local_addr()?, app.routes().len());
    axum::serve(listener, app.router).await?;
    Ok(())
}
