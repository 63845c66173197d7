use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use flurry_api::AppStateInner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flurry=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("FLURRY_DB_PATH").unwrap_or_else(|_| "flurry.db".into());
    let host = std::env::var("FLURRY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FLURRY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = flurry_db::Database::open(&PathBuf::from(&db_path))?;

    let app = flurry_api::router(AppStateInner::new(db));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("flurry server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
