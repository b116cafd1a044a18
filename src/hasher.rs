//! Data Hasher.
//!
//! Populates the temp table's `contentHash` column with SHA-256, hex
//! encoded, over the hash-source columns. On the primary (MySQL) dialect
//! this is a single set-based `UPDATE`. On SQLite (carried for this
//! crate's own tests, no native SHA-256) the hash is computed
//! application-side and applied with one `UPDATE ... WHERE <pk>` per row.

use crate::config::Config;
use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use sqlx::Row;
use tracing::warn;

const HASH_SEPARATOR: &str = "-";

/// Populate `temp.contentHash`. Returns the number of rows updated. If
/// `columns_for_content_hash` is empty, logs a warning and returns 0
/// without issuing any statement.
pub async fn populate_content_hash(config: &Config) -> Result<u64> {
    if config.columns_for_content_hash.is_empty() {
        warn!("columns_for_content_hash is empty; skipping hash computation");
        return Ok(0);
    }

    let conn = &config.target_connection;
    let data_map = config.data_map_lookup();
    let hash_target_columns: Vec<String> = config
        .columns_for_content_hash
        .iter()
        .map(|source| data_map.get(source.as_str()).copied().unwrap_or(source.as_str()).to_string())
        .collect();

    if conn.dialect().supports_native_sha256() {
        populate_via_single_update(config, &hash_target_columns).await
    } else {
        populate_via_application_hash(config, &hash_target_columns).await
    }
}

async fn populate_via_single_update(config: &Config, hash_target_columns: &[String]) -> Result<u64> {
    let conn = &config.target_connection;
    let dialect = conn.dialect();

    let casts: Vec<String> = hash_target_columns
        .iter()
        .map(|c| format!("COALESCE({}, '')", dialect.cast_to_text(&dialect.quote_ident(c))))
        .collect();

    let mut interleaved = Vec::with_capacity(casts.len() * 2 - 1);
    for (i, cast) in casts.into_iter().enumerate() {
        if i > 0 {
            interleaved.push(format!("'{}'", HASH_SEPARATOR));
        }
        interleaved.push(cast);
    }
    let concat_expr = dialect.concat(&interleaved);
    let hash_expr = dialect
        .native_sha256_hex_expr(&concat_expr)
        .expect("caller only takes this path when native_sha256_hex_expr is Some");

    let sql = format!(
        "UPDATE {temp} SET {hash_col} = {expr}",
        temp = dialect.quote_ident(&config.target_temp_table_name),
        hash_col = dialect.quote_ident(&config.metadata_columns.content_hash),
        expr = hash_expr,
    );

    let result = sqlx::query(&sql)
        .execute(conn.pool())
        .await
        .map_err(|e| SyncError::Hash { table: config.target_temp_table_name.clone(), source: e })?;
    Ok(result.rows_affected())
}

async fn populate_via_application_hash(config: &Config, hash_target_columns: &[String]) -> Result<u64> {
    let conn = &config.target_connection;
    let dialect = conn.dialect();
    let pk_columns = config.pk_target_columns();

    let mut select_cols = pk_columns.clone();
    select_cols.extend(hash_target_columns.iter().cloned());
    let select_list = select_cols.iter().map(|c| dialect.quote_ident(c)).collect::<Vec<_>>().join(", ");

    let select_sql = format!("SELECT {} FROM {}", select_list, dialect.quote_ident(&config.target_temp_table_name));
    let rows = sqlx::query(&select_sql)
        .fetch_all(conn.pool())
        .await
        .map_err(|e| SyncError::Hash { table: config.target_temp_table_name.clone(), source: e })?;

    let mut updated = 0u64;
    for row in &rows {
        let mut hasher = Sha256::new();
        for (i, _col) in hash_target_columns.iter().enumerate() {
            if i > 0 {
                hasher.update(HASH_SEPARATOR.as_bytes());
            }
            let idx = pk_columns.len() + i;
            let text = render_column_as_text(row, idx).unwrap_or_default();
            hasher.update(text.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());

        let pk_where: Vec<String> = pk_columns.iter().map(|c| format!("{} = ?", dialect.quote_ident(c))).collect();
        let update_sql = format!(
            "UPDATE {temp} SET {hash_col} = ? WHERE {where_clause}",
            temp = dialect.quote_ident(&config.target_temp_table_name),
            hash_col = dialect.quote_ident(&config.metadata_columns.content_hash),
            where_clause = pk_where.join(" AND "),
        );
        let mut query = sqlx::query(&update_sql).bind(digest);
        for i in 0..pk_columns.len() {
            let pk_text = render_column_as_text(row, i).unwrap_or_default();
            query = query.bind(pk_text);
        }
        let result = query
            .execute(conn.pool())
            .await
            .map_err(|e| SyncError::Hash { table: config.target_temp_table_name.clone(), source: e })?;
        updated += result.rows_affected();
    }

    Ok(updated)
}

/// Best-effort `CAST(col AS TEXT)` emulation for values already fetched
/// into Rust, used only by the SQLite application-side fallback path.
fn render_column_as_text(row: &sqlx::any::AnyRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(|b| if b { "1".to_string() } else { "0".to_string() });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    async fn config_with_rows(rows: &[(i64, &str, Option<&str>)]) -> Config {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE live_temp (pk INTEGER PRIMARY KEY, name TEXT, note TEXT, content_hash TEXT, created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00')")
            .execute(conn.pool())
            .await
            .unwrap();
        for (pk, name, note) in rows {
            sqlx::query("INSERT INTO live_temp (pk, name, note) VALUES (?, ?, ?)")
                .bind(pk)
                .bind(*name)
                .bind(*note)
                .execute(conn.pool())
                .await
                .unwrap();
        }

        ConfigBuilder::default()
            .source_connection(conn.clone())
            .target_connection(conn)
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .data_column("note", "note")
            .hash_column("name")
            .hash_column("note")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn hashes_every_row() {
        let config = config_with_rows(&[(1, "a", Some("x")), (2, "b", None)]).await;
        let updated = populate_content_hash(&config).await.unwrap();
        assert_eq!(updated, 2);

        let hashes: Vec<Option<String>> =
            sqlx::query_scalar("SELECT content_hash FROM live_temp ORDER BY pk").fetch_all(config.target_connection.pool()).await.unwrap();
        assert!(hashes.iter().all(|h| matches!(h, Some(s) if s.len() == 64)));
    }

    #[tokio::test]
    async fn null_vs_placeholder_collapse_to_same_hash_when_coalesced_identically() {
        let config = config_with_rows(&[(1, "a", None), (2, "a", Some(""))]).await;
        populate_content_hash(&config).await.unwrap();
        let hashes: Vec<String> =
            sqlx::query_scalar("SELECT content_hash FROM live_temp ORDER BY pk").fetch_all(config.target_connection.pool()).await.unwrap();
        assert_eq!(hashes[0], hashes[1]);
    }

    #[tokio::test]
    async fn empty_hash_column_set_is_a_no_op() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE live_temp (pk INTEGER PRIMARY KEY, name TEXT, content_hash TEXT, created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00')")
            .execute(conn.pool())
            .await
            .unwrap();
        let mut config = ConfigBuilder::default()
            .source_connection(conn.clone())
            .target_connection(conn)
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .hash_column("name")
            .build()
            .unwrap();
        config.columns_for_content_hash.clear();

        let updated = populate_content_hash(&config).await.unwrap();
        assert_eq!(updated, 0);
    }
}
