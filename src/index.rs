//! Index Manager.
//!
//! Idempotently creates the indices required on the temp table (after
//! load) and the live table. Like the Schema Manager, this runs outside
//! any transaction — these are DDL statements.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::error::SyncError;
use tracing::info;

/// Unique index on temp's business PK, non-unique index on `contentHash`.
pub async fn add_indices_to_temp_table_after_load(config: &Config) -> Result<()> {
    let pk_columns = config.pk_target_columns();
    add_index_if_not_exists(&config.target_connection, &config.target_temp_table_name, &pk_columns, true, None).await?;
    add_index_if_not_exists(
        &config.target_connection,
        &config.target_temp_table_name,
        &[config.metadata_columns.content_hash.clone()],
        false,
        None,
    )
    .await?;
    Ok(())
}

/// Non-unique index on `contentHash`, optional unique index on the
/// business PK.
pub async fn add_indices_to_live_table(config: &Config) -> Result<()> {
    add_index_if_not_exists(
        &config.target_connection,
        &config.target_live_table_name,
        &[config.metadata_columns.content_hash.clone()],
        false,
        None,
    )
    .await?;
    let pk_columns = config.pk_target_columns();
    add_index_if_not_exists(&config.target_connection, &config.target_live_table_name, &pk_columns, true, None).await?;
    Ok(())
}

/// Idempotent: introspects existing indices and skips creation if an index
/// with the derived (or supplied) name already exists.
pub async fn add_index_if_not_exists(
    conn: &Connection,
    table: &str,
    columns: &[String],
    unique: bool,
    name: Option<&str>,
) -> Result<()> {
    let index_name = match name {
        Some(n) => n.to_string(),
        None => default_index_name(conn, table, columns, unique),
    };

    if index_exists(conn, table, &index_name).await.map_err(|e| SyncError::Index { table: table.to_string(), source: e })? {
        info!(table = %table, index = %index_name, "index already present, skipping");
        return Ok(());
    }

    let unique_kw = if unique { "UNIQUE " } else { "" };
    let quoted_cols: Vec<String> = columns.iter().map(|c| conn.quote_ident(c)).collect();
    let sql = format!(
        "CREATE {unique}INDEX {index} ON {table} ({cols})",
        unique = unique_kw,
        index = conn.quote_ident(&index_name),
        table = conn.quote_ident(table),
        cols = quoted_cols.join(", "),
    );

    info!(table = %table, index = %index_name, sql = %sql, "creating index");
    match sqlx::query(&sql).execute(conn.pool()).await {
        Ok(_) => Ok(()),
        // A concurrent invocation (or a retry) may have created the index
        // between our existence check and the CREATE INDEX above; that is
        // not a failure under this module's idempotency contract.
        Err(sqlx::Error::Database(db_err)) if db_err.message().to_ascii_lowercase().contains("already exists") => Ok(()),
        Err(e) => Err(SyncError::Index { table: table.to_string(), source: e }.into()),
    }
}

fn default_index_name(conn: &Connection, table: &str, columns: &[String], unique: bool) -> String {
    let prefix = if unique { "uniq_" } else { "idx_" };
    let raw = format!("{prefix}{table}_{}", columns.join("_"));
    let max_len = conn.dialect().identifier_max_len();
    if raw.len() > max_len {
        raw.chars().take(max_len).collect()
    } else {
        raw
    }
}

async fn index_exists(conn: &Connection, table: &str, index_name: &str) -> std::result::Result<bool, sqlx::Error> {
    match conn.dialect().name() {
        "mysql" => {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
            )
            .bind(table)
            .bind(index_name)
            .fetch_one(conn.pool())
            .await?;
            Ok(count > 0)
        }
        "sqlite" => {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name = ?")
                    .bind(index_name)
                    .fetch_one(conn.pool())
                    .await?;
            Ok(count > 0)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derives_stable_default_index_names() {
        let conn = crate::connection::test_sqlite_memory().await;
        let name = default_index_name(&conn, "live", &["pk".to_string()], true);
        assert_eq!(name, "uniq_live_pk");
        let name = default_index_name(&conn, "live", &["content_hash".to_string()], false);
        assert_eq!(name, "idx_live_content_hash");
    }

    #[tokio::test]
    async fn add_index_if_not_exists_is_idempotent() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE live (pk INTEGER, content_hash TEXT)").execute(conn.pool()).await.unwrap();

        add_index_if_not_exists(&conn, "live", &["content_hash".to_string()], false, None).await.unwrap();
        add_index_if_not_exists(&conn, "live", &["content_hash".to_string()], false, None).await.unwrap();

        let exists = index_exists(&conn, "live", "idx_live_content_hash").await.unwrap();
        assert!(exists);
    }
}
