//! Loader and datetime placeholder substitution.
//!
//! Streams rows from source via a cursor (fetch-as-needed, not buffered
//! whole), applies placeholder substitution, and bulk-inserts into temp
//! using one reusable parameterized `INSERT`.

use crate::config::{Config, SemanticType};
use crate::error::{Result, SyncError};
use crate::schema::SchemaManager;
use chrono::NaiveDateTime;
use futures::TryStreamExt;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{Arguments, Row};
use tracing::debug;

const PROGRESS_INTERVAL: u64 = 1000;

/// Stream rows from `config.source_connection` and insert them into the
/// temp table. Returns the number of rows loaded.
pub async fn load(config: &Config, schema: &SchemaManager) -> Result<u64> {
    let source_types = schema.get_source_column_types(config).await?;

    let source_cols: Vec<&str> = config.data_column_mapping.iter().map(|(s, _)| s.as_str()).collect();
    let target_cols: Vec<&str> = config.data_column_mapping.iter().map(|(_, t)| t.as_str()).collect();

    let source_dialect = config.source_connection.dialect();
    let select_cols: Vec<String> = source_cols.iter().map(|c| source_dialect.quote_ident(c)).collect();
    let select_sql = format!(
        "SELECT {} FROM {}",
        select_cols.join(", "),
        source_dialect.quote_ident(&config.source_object_name),
    );

    let target_dialect = config.target_connection.dialect();
    let insert_cols: Vec<String> = target_cols.iter().map(|c| target_dialect.quote_ident(c)).collect();
    let placeholders: Vec<&str> = target_cols.iter().map(|_| "?").collect();
    let insert_sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        target_dialect.quote_ident(&config.target_temp_table_name),
        insert_cols.join(", "),
        placeholders.join(", "),
    );

    let mut stream = sqlx::query(&select_sql).fetch(config.source_connection.pool());
    let mut loaded: u64 = 0;

    while let Some(row) = stream
        .try_next()
        .await
        .map_err(|e| SyncError::Load { table: config.target_temp_table_name.clone(), rows_loaded: loaded, source: e })?
    {
        let mut args = AnyArguments::default();
        for (idx, source_col) in source_cols.iter().enumerate() {
            let semantic = source_types.get(*source_col).copied();
            let non_nullable_datetime = config.non_nullable_datetime_source_columns.contains(*source_col);
            bind_column(&mut args, &row, idx, semantic, non_nullable_datetime, &config.placeholder_datetime)?;
        }

        sqlx::query_with(&insert_sql, args)
            .execute(config.target_connection.pool())
            .await
            .map_err(|e| SyncError::Load { table: config.target_temp_table_name.clone(), rows_loaded: loaded, source: e })?;

        loaded += 1;
        if loaded % PROGRESS_INTERVAL == 0 {
            debug!(rows_loaded = loaded, "load progress");
        }
    }

    Ok(loaded)
}

fn bind_column<'q>(
    args: &mut AnyArguments<'q>,
    row: &AnyRow,
    idx: usize,
    semantic: Option<SemanticType>,
    non_nullable_datetime: bool,
    placeholder: &str,
) -> Result<()> {
    if non_nullable_datetime {
        let raw = read_as_text(row, idx);
        let substituted = substitute_datetime_placeholder(raw.as_deref(), placeholder);
        args.add(substituted).ok();
        return Ok(());
    }

    match semantic {
        Some(SemanticType::Integer) | Some(SemanticType::BigInt) | Some(SemanticType::SmallInt) => {
            let v: Option<i64> = row.try_get(idx).unwrap_or(None);
            args.add(v).ok();
        }
        Some(SemanticType::Boolean) => {
            let v: Option<bool> = row.try_get(idx).unwrap_or(None);
            args.add(v).ok();
        }
        Some(SemanticType::Blob) | Some(SemanticType::Binary) => {
            let v: Option<Vec<u8>> = row.try_get(idx).unwrap_or(None);
            args.add(v).ok();
        }
        Some(_) => {
            let v = read_as_text(row, idx);
            args.add(v).ok();
        }
        // Unknown column: runtime inference — null, then
        // integer, then boolean, then binary, falling back to string.
        None => {
            if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                args.add(v).ok();
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
                args.add(v).ok();
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
                args.add(v).ok();
            } else {
                args.add(read_as_text(row, idx)).ok();
            }
        }
    }
    Ok(())
}

fn read_as_text(row: &AnyRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return v.map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|n| n.to_string());
    }
    None
}

/// §4.5.1 — substitute `placeholder` for any value that is empty,
/// unparseable, the MySQL zero-datetime sentinel, or begins with `-`
/// (negative-year sentinel). Otherwise pass through unchanged.
pub fn substitute_datetime_placeholder(raw: Option<&str>, placeholder: &str) -> String {
    match raw {
        None => placeholder.to_string(),
        Some(s) if s.is_empty() => placeholder.to_string(),
        Some(s) if s == "0000-00-00 00:00:00" => placeholder.to_string(),
        Some(s) if s.starts_with('-') => placeholder.to_string(),
        Some(s) => match try_parse_timestamp(s) {
            Ok(_) => s.to_string(),
            Err(()) => placeholder.to_string(),
        },
    }
}

/// Explicit success/failure timestamp parse, preferred here over
/// exception-for-control-flow.
fn try_parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, ()> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap()))
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    const PLACEHOLDER: &str = "2222-02-22 00:00:00";

    #[test]
    fn substitutes_null() {
        assert_eq!(substitute_datetime_placeholder(None, PLACEHOLDER), PLACEHOLDER);
    }

    #[test]
    fn substitutes_empty_string() {
        assert_eq!(substitute_datetime_placeholder(Some(""), PLACEHOLDER), PLACEHOLDER);
    }

    #[test]
    fn substitutes_zero_datetime_sentinel() {
        assert_eq!(substitute_datetime_placeholder(Some("0000-00-00 00:00:00"), PLACEHOLDER), PLACEHOLDER);
    }

    #[test]
    fn substitutes_negative_year_sentinel() {
        assert_eq!(substitute_datetime_placeholder(Some("-0001-01-01 00:00:00"), PLACEHOLDER), PLACEHOLDER);
    }

    #[test]
    fn substitutes_unparseable_string() {
        assert_eq!(substitute_datetime_placeholder(Some("not-a-date"), PLACEHOLDER), PLACEHOLDER);
    }

    #[test]
    fn passes_through_valid_datetime() {
        assert_eq!(substitute_datetime_placeholder(Some("2024-01-01 00:00:00"), PLACEHOLDER), "2024-01-01 00:00:00");
    }

    #[test]
    fn passes_through_valid_date_only() {
        assert_eq!(substitute_datetime_placeholder(Some("2024-01-01"), PLACEHOLDER), "2024-01-01");
    }

    #[tokio::test]
    async fn loads_rows_streaming_from_source_into_temp() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE src (id INTEGER, name TEXT, updated_ts TEXT)").execute(conn.pool()).await.unwrap();
        sqlx::query("INSERT INTO src (id, name, updated_ts) VALUES (1, 'a', '2024-01-01 00:00:00'), (2, 'b', NULL)")
            .execute(conn.pool())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE live_temp (pk INTEGER NOT NULL, name TEXT, updated_ts TEXT NOT NULL, \
             content_hash TEXT, created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', PRIMARY KEY (pk))",
        )
        .execute(conn.pool())
        .await
        .unwrap();

        let config = ConfigBuilder::default()
            .source_connection(conn.clone())
            .target_connection(conn.clone())
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .data_column("updated_ts", "updated_ts")
            .hash_column("name")
            .hash_column("updated_ts")
            .non_nullable_datetime_column("updated_ts")
            .build()
            .unwrap();

        let schema = SchemaManager::new();
        let loaded = load(&config, &schema).await.unwrap();
        assert_eq!(loaded, 2);

        let placeholders: Vec<String> =
            sqlx::query_scalar("SELECT updated_ts FROM live_temp ORDER BY pk").fetch_all(conn.pool()).await.unwrap();
        assert_eq!(placeholders[0], "2024-01-01 00:00:00");
        assert_eq!(placeholders[1], "2222-02-22 00:00:00");
    }
}
