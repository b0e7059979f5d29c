use std::path::{Path, PathBuf};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

pub const DB_FILE: &str = "beatlight.db";
const APP_DIR: &str = "beatlight";

pub struct Db(pub SqlitePool);

/// `<config dir>/beatlight`
pub fn default_config_dir() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| "Failed to get app config dir".to_string())
}

/*
 * Initializes the app database, used to store settings and the
 * persisted show documents (entity graph, mappings, dimmer config).
 */
pub async fn init_app_db(app_dir: &Path) -> Result<Db, String> {
    std::fs::create_dir_all(app_dir).map_err(|e| {
        format!(
            "Failed to create app config dir {}: {}",
            app_dir.display(),
            e
        )
    })?;

    let db_path = app_dir.join(DB_FILE);
    let connect_options = SqliteConnectOptions::new()
        .filename(&db_path)
        .journal_mode(SqliteJournalMode::Wal)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(3)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            format!(
                "Failed to connect to database at {}: {}",
                db_path.display(),
                e
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| format!("Failed to run app migrations: {}", e))?;

    Ok(Db(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_database_in_fresh_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("config").join("beatlight");
        let db = init_app_db(&nested).await.unwrap();
        assert!(nested.join(DB_FILE).exists());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_store")
            .fetch_one(&db.0)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
