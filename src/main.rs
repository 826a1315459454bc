use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sudoroot::auth::admin;
use sudoroot::cache::{CacheBackend, FanoutCache, MemoryBackend, RedisBackend, RestBackend};
use sudoroot::config::{CacheConfig, Cli, Command, Config};
use sudoroot::state::AppState;
use sudoroot::{db, members, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    if let Some(Command::CreateAdmin { username, password }) = &cli.command {
        let conn = pool.get()?;
        let admin = admin::upsert_admin(&conn, username, password, bcrypt::DEFAULT_COST)?;
        tracing::info!(username = %admin.username, "Admin account ready");
        return Ok(());
    }

    let cache = build_cache(&config.cache).await?;

    let _sweep = members::spawn_expiry_sweep(
        pool.clone(),
        Duration::from_secs(config.membership.sweep_interval_secs),
    );

    let state = AppState {
        db: pool,
        config: config.clone(),
        cache: Arc::new(cache),
    };

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Primary is Redis when reachable at startup; the fallback is the REST cache
/// when configured, otherwise an in-process list.
async fn build_cache(config: &CacheConfig) -> anyhow::Result<FanoutCache> {
    let primary: Option<Arc<dyn CacheBackend>> = match config.redis_url.as_deref() {
        Some(url) => {
            match tokio::time::timeout(config.primary_timeout(), RedisBackend::connect(url)).await
            {
                Ok(Ok(backend)) => Some(Arc::new(backend)),
                Ok(Err(e)) => {
                    tracing::warn!("Redis unavailable, using fallback cache only: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!("Redis connect timed out, using fallback cache only");
                    None
                }
            }
        }
        None => None,
    };

    let fallback: Arc<dyn CacheBackend> = match (&config.rest_url, &config.rest_token) {
        (Some(url), Some(token)) => {
            Arc::new(RestBackend::new(url, token, config.fallback_timeout())?)
        }
        _ => {
            tracing::info!("No REST cache configured, using in-process fallback");
            Arc::new(MemoryBackend::default())
        }
    };

    Ok(FanoutCache::new(
        primary,
        fallback,
        config.primary_timeout(),
        config.retry_primary_after(),
    ))
}
