//! Example consumer: a separate Rust project that serves crudforge routes over PostgreSQL.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`
//!
//! Expects `SCHEMA_PATH` to point at a model schema document (see demos/schema.json) whose
//! tables already exist in `DATABASE_SCHEMA` (default `public`).

use crudforge::{config::read_schema, PgOrm, RouterAssembly, Settings, StaticModelProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crudforge=info")),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/crudforge".into());
    let db_schema = std::env::var("DATABASE_SCHEMA").unwrap_or_else(|_| "public".into());
    let schema_path = PathBuf::from(std::env::var("SCHEMA_PATH").unwrap_or_else(|_| "schema.json".into()));

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let provider = StaticModelProvider::from_json(&read_schema(&schema_path).await?)?;
    let orm = PgOrm::new(pool, db_schema, provider.models().to_vec());
    let settings = Settings::from_env()?;
    let app = RouterAssembly::new(Arc::new(orm), Arc::new(provider))
        .settings(settings)
        .build()
        .await?;

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    let port = listener.local_addr()?.port();
    tracing::info!("Example consumer listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app.router).await?;
    Ok(())
}
