//! Source Introspector.
//!
//! Given `(connection, name)`, returns a mapping column-name ->
//! [`SourceColumn`]. Resolution order: table, then view, then a
//! last-resort introspection probe. View and table are treated identically
//! once introspection succeeds.

use crate::config::SemanticType;
use crate::connection::Connection;
use crate::error::{ConfigResult, ConfigurationError};
use sqlx::Row;
use std::collections::BTreeMap;

/// One column's metadata as reported by the source database.
#[derive(Debug, Clone)]
pub struct SourceColumn {
    pub semantic_type: SemanticType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub unsigned: bool,
    pub fixed: bool,
    pub not_null: bool,
    pub default: Option<String>,
    pub autoincrement: bool,
    pub comment: Option<String>,
}

/// Introspect `name` on `conn`, trying table, then view, then a last-resort
/// probe. Columns are keyed by name and returned in catalog order
/// (preserved via the `BTreeMap`'s insertion order is NOT guaranteed by
/// `BTreeMap` — callers that need declared order should consult
/// the declared order via the config's own column lists
/// instead of this map's iteration order).
pub async fn introspect(conn: &Connection, name: &str) -> ConfigResult<BTreeMap<String, SourceColumn>> {
    if let Some(cols) = introspect_table(conn, name).await? {
        return Ok(cols);
    }
    if let Some(cols) = introspect_view(conn, name).await? {
        return Ok(cols);
    }
    if let Some(cols) = introspect_probe(conn, name).await? {
        return Ok(cols);
    }
    Err(ConfigurationError::SourceObjectNotFound {
        object: name.to_string(),
        database: conn.current_database_name().await,
    })
}

async fn introspect_table(conn: &Connection, name: &str) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    introspect_catalog(conn, name, "BASE TABLE").await
}

async fn introspect_view(conn: &Connection, name: &str) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    introspect_catalog(conn, name, "VIEW").await
}

async fn introspect_catalog(
    conn: &Connection,
    name: &str,
    object_type: &str,
) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    match conn.dialect().name() {
        "mysql" => introspect_mysql(conn, name, object_type).await,
        "sqlite" => introspect_sqlite(conn, name).await,
        other => Err(ConfigurationError::UnsupportedDialect(other.to_string())),
    }
}

async fn introspect_mysql(
    conn: &Connection,
    name: &str,
    object_type: &str,
) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    let exists: Option<String> = sqlx::query_scalar(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ? AND table_type = ?",
    )
    .bind(name)
    .bind(object_type)
    .fetch_optional(conn.pool())
    .await?;

    if exists.is_none() {
        return Ok(None);
    }

    let rows = sqlx::query(
        "SELECT column_name, data_type, character_maximum_length, numeric_precision, numeric_scale, \
                is_nullable, column_default, extra, column_comment \
         FROM information_schema.columns WHERE table_schema = DATABASE() AND table_name = ? \
         ORDER BY ordinal_position",
    )
    .bind(name)
    .fetch_all(conn.pool())
    .await?;

    let mut cols = BTreeMap::new();
    for row in rows {
        let column_name: String = row.try_get("column_name")?;
        let data_type: String = row.try_get("data_type")?;
        let is_nullable: String = row.try_get("is_nullable")?;
        let extra: Option<String> = row.try_get("extra").ok();
        cols.insert(
            column_name,
            SourceColumn {
                semantic_type: conn.dialect().classify_native_type(&data_type),
                length: row.try_get::<Option<i64>, _>("character_maximum_length").ok().flatten().map(|v| v as u32),
                precision: row.try_get::<Option<i64>, _>("numeric_precision").ok().flatten().map(|v| v as u32),
                scale: row.try_get::<Option<i64>, _>("numeric_scale").ok().flatten().map(|v| v as u32),
                unsigned: data_type.to_ascii_lowercase().contains("unsigned"),
                fixed: data_type.eq_ignore_ascii_case("char") || data_type.eq_ignore_ascii_case("binary"),
                not_null: is_nullable.eq_ignore_ascii_case("NO"),
                default: row.try_get::<Option<String>, _>("column_default").ok().flatten(),
                autoincrement: extra.as_deref().unwrap_or_default().contains("auto_increment"),
                comment: row.try_get::<Option<String>, _>("column_comment").ok().flatten(),
            },
        );
    }
    Ok(Some(cols))
}

async fn introspect_sqlite(conn: &Connection, name: &str) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    let object_exists: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE (type='table' OR type='view') AND name = ?",
    )
    .bind(name)
    .fetch_optional(conn.pool())
    .await?;
    if object_exists.is_none() {
        return Ok(None);
    }

    let rows = sqlx::query(&format!("PRAGMA table_info({})", conn.quote_ident(name)))
        .fetch_all(conn.pool())
        .await?;

    let mut cols = BTreeMap::new();
    for row in rows {
        let column_name: String = row.try_get("name")?;
        let type_name: String = row.try_get("type")?;
        let not_null: i64 = row.try_get("notnull")?;
        let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
        let pk: i64 = row.try_get("pk")?;
        cols.insert(
            column_name,
            SourceColumn {
                semantic_type: conn.dialect().classify_native_type(&type_name),
                length: None,
                precision: None,
                scale: None,
                unsigned: false,
                fixed: false,
                not_null: not_null != 0,
                default: default_value,
                autoincrement: pk != 0 && type_name.eq_ignore_ascii_case("INTEGER"),
                comment: None,
            },
        );
    }
    Ok(Some(cols))
}

/// Last-resort probe used when catalog introspection is unavailable (e.g.
/// missing catalog privileges): `SELECT * FROM <name> LIMIT 0` and reflect
/// column names from the empty result set. No catalog type information is
/// available this way, so every column is classified as `String`.
async fn introspect_probe(conn: &Connection, name: &str) -> ConfigResult<Option<BTreeMap<String, SourceColumn>>> {
    use sqlx::Executor;

    let quoted = conn.quote_ident(name);
    let sql = format!("SELECT * FROM {} LIMIT 0", quoted);
    let described = match conn.pool().describe(&sql).await {
        Ok(d) => d,
        Err(_) => return Ok(None),
    };

    let mut cols = BTreeMap::new();
    for column in described.columns() {
        cols.insert(
            column.name().to_string(),
            SourceColumn {
                semantic_type: SemanticType::String,
                length: None,
                precision: None,
                scale: None,
                unsigned: false,
                fixed: false,
                not_null: false,
                default: None,
                autoincrement: false,
                comment: None,
            },
        );
    }
    Ok(Some(cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn introspects_sqlite_table_columns() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL)")
            .execute(conn.pool())
            .await
            .unwrap();

        let cols = introspect(&conn, "widgets").await.unwrap();
        assert_eq!(cols.len(), 3);
        assert!(matches!(cols["id"].semantic_type, SemanticType::Integer));
        assert!(cols["name"].not_null);
        assert!(matches!(cols["price"].semantic_type, SemanticType::Float));
    }

    #[tokio::test]
    async fn introspects_sqlite_view_when_no_table_matches() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE widgets (id INTEGER, name TEXT)").execute(conn.pool()).await.unwrap();
        sqlx::query("CREATE VIEW widget_names AS SELECT id, name FROM widgets").execute(conn.pool()).await.unwrap();

        let cols = introspect(&conn, "widget_names").await.unwrap();
        assert_eq!(cols.len(), 2);
    }

    #[tokio::test]
    async fn unknown_object_is_a_configuration_error() {
        let conn = crate::connection::test_sqlite_memory().await;
        let err = introspect(&conn, "does_not_exist").await;
        assert!(matches!(err, Err(ConfigurationError::SourceObjectNotFound { .. })));
    }
}
