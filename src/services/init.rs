//! Startup helpers: database connection and migrations.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::Config;

/// Strip credentials from a database URL before it is logged.
pub fn redact_db_url(db_url: &str) -> String {
    match url::Url::parse(db_url) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if url.set_username("").is_err() || url.set_password(None).is_err() {
                return "(redacted)".to_string();
            }
            url.to_string()
        }
        _ => match db_url.rfind('@') {
            Some(at) => format!("(redacted){}", &db_url[at + 1..]),
            None if db_url.contains(':') && !db_url.contains("://") => "(redacted)".to_string(),
            None => db_url.to_string(),
        },
    }
}

/// Open the schedule database, creating the file and its directory when
/// missing, and apply pending migrations.
pub async fn init_db(config: &Config) -> Result<SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path))?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
