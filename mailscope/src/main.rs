/*
mailscope - HTTP server binary.
Loads configuration, resolves the capability registry once, then serves the e-mail
analysis API until shutdown.
*/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, run_migrations, Config};
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mailscope::registry::CapabilityRegistry;
use mailscope::server::{launch_rocket, AppState};
use mailscope::storage;

#[derive(Parser, Debug)]
#[command(name = "mailscope", about = "E-mail summarization, sentiment and reply drafting server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Resolve `config.default.toml` plus `--config` (or `./config.toml`) and merge them.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) => {
            if !p.exists() {
                error!(path = ?p, "specified config file not found");
                return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
            }
            Some(p)
        }
        None => {
            let p = PathBuf::from("config.toml");
            if p.exists() {
                Some(p)
            } else {
                None
            }
        }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

async fn open_database(config: &Config) -> Result<Option<SqlitePool>> {
    let Some(db) = &config.database else {
        info!("no [database] section, analyses will not be persisted");
        return Ok(None);
    };

    let db_path_abs = match tokio::fs::canonicalize(&db.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => db.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let pool = init_db_pool(&db_path_abs).await.map_err(|e| {
        error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
        e
    })?;

    if config.admin.as_ref().and_then(|a| a.auto_migrate).unwrap_or(false) {
        info!("Auto-migrate enabled: running DB migrations");
        run_migrations(&pool).await?;
        info!("DB migrations completed");
    } else {
        storage::ensure_schema(&pool).await?;
    }
    Ok(Some(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await.map_err(|e| {
        error!(%e, "failed to load configuration");
        e
    })?;

    let db = open_database(&config).await?;
    let registry = Arc::new(CapabilityRegistry::from_config(&config));
    if registry.availability().iter().all(|c| !c.available) {
        warn!("no model capability available, serving rule-based results only");
    }

    let state = AppState::new(&config, registry, db);
    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(state, &config.server).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
