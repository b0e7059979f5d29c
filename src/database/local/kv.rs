//! JSON documents stored under fixed keys.

use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;

pub async fn get_value(pool: &SqlitePool, key: &str) -> Result<Option<String>, String> {
    sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| format!("Failed to read {}: {}", key, e))
}

pub async fn put_value(pool: &SqlitePool, key: &str, value: &str) -> Result<(), String> {
    sqlx::query(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(|e| format!("Failed to write {}: {}", key, e))?;

    Ok(())
}

/// Missing keys yield None; a document that no longer parses is an error.
pub async fn load_json<T: DeserializeOwned>(
    pool: &SqlitePool,
    key: &str,
) -> Result<Option<T>, String> {
    let Some(raw) = get_value(pool, key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse {}: {}", key, e))
}

pub async fn save_json<T: Serialize>(
    pool: &SqlitePool,
    key: &str,
    value: &T,
) -> Result<(), String> {
    let raw = serde_json::to_string(value)
        .map_err(|e| format!("Failed to serialize {}: {}", key, e))?;
    put_value(pool, key, &raw).await
}
