//! Schema Manager.
//!
//! Ensures the live table exists and is structurally compatible, creates
//! and drops the temp table, and caches the source column-type map. DDL
//! here always runs outside any transaction — most engines auto-commit
//! DDL, so interleaving it with transactional DML on the live table would
//! silently end that transaction.

use crate::config::{Config, SemanticType};
use crate::connection::Connection;
use crate::error::{ConfigResult, ConfigurationError};
use crate::introspect::{self, SourceColumn};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Instance-scoped cache of source column types, keyed by the single
/// `source_object_name` most recently resolved; the cache invalidates
/// whenever that name changes. Concurrent invocations must each use their
/// own `SchemaManager`.
pub struct SchemaManager {
    cache: Mutex<Option<(String, HashMap<String, SemanticType>)>>,
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self { cache: Mutex::new(None) }
    }
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source-column-name -> semantic-type map, cached per
    /// `source_object_name`.
    pub async fn get_source_column_types(&self, config: &Config) -> ConfigResult<HashMap<String, SemanticType>> {
        {
            let cache = self.cache.lock().await;
            if let Some((cached_name, types)) = cache.as_ref() {
                if cached_name == &config.source_object_name {
                    return Ok(types.clone());
                }
            }
        }

        let columns = introspect::introspect(&config.source_connection, &config.source_object_name).await?;
        let types: HashMap<String, SemanticType> = columns.into_iter().map(|(name, col)| (name, col.semantic_type)).collect();

        let mut cache = self.cache.lock().await;
        *cache = Some((config.source_object_name.clone(), types.clone()));
        Ok(types)
    }

    /// Create the live table if absent; otherwise verify every expected
    /// data and metadata column is present and type-compatible. Surplus
    /// columns are tolerated.
    pub async fn ensure_live_table(&self, config: &Config) -> ConfigResult<()> {
        let table = &config.target_live_table_name;
        let exists = table_exists(&config.target_connection, table).await?;

        if !exists {
            info!(table = %table, "live table does not exist; creating");
            let source_types = self.get_source_column_types(config).await?;
            let sql = build_create_live_table_sql(config, &source_types);
            sqlx::query(&sql).execute(config.target_connection.pool()).await?;
            return Ok(());
        }

        info!(table = %table, "live table exists; verifying structural compatibility");
        let actual = introspect::introspect(&config.target_connection, table).await?;
        let source_types = self.get_source_column_types(config).await?;

        for (_, target) in &config.data_column_mapping {
            verify_expected_column(config, table, target, &actual, expected_data_column_type(config, &source_types, target))?;
        }
        verify_expected_column(config, table, &config.metadata_columns.id, &actual, config.target_id_column_type)?;
        verify_expected_column(config, table, &config.metadata_columns.content_hash, &actual, config.target_hash_column_type)?;
        verify_expected_column(config, table, &config.metadata_columns.created_at, &actual, SemanticType::DateTime)?;
        verify_expected_column(config, table, &config.metadata_columns.updated_at, &actual, SemanticType::DateTime)?;
        verify_expected_column(config, table, &config.metadata_columns.batch_revision, &actual, SemanticType::Integer)?;

        Ok(())
    }

    /// Drop the temp table if present, then recreate it empty, per
    /// spec.
    pub async fn prepare_temp_table(&self, config: &Config) -> ConfigResult<()> {
        self.drop_temp_table(config).await?;
        let source_types = self.get_source_column_types(config).await?;
        let sql = build_create_temp_table_sql(config, &source_types);
        sqlx::query(&sql).execute(config.target_connection.pool()).await?;
        Ok(())
    }

    /// Idempotent drop of the temp table.
    pub async fn drop_temp_table(&self, config: &Config) -> ConfigResult<()> {
        let table = config.target_connection.quote_ident(&config.target_temp_table_name);
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table)).execute(config.target_connection.pool()).await?;
        Ok(())
    }
}

fn expected_data_column_type(config: &Config, source_types: &HashMap<String, SemanticType>, target_col: &str) -> SemanticType {
    config
        .data_column_mapping
        .iter()
        .find(|(_, t)| t == target_col)
        .and_then(|(s, _)| source_types.get(s.as_str()))
        .copied()
        .unwrap_or(SemanticType::String)
}

fn verify_expected_column(
    config: &Config,
    table: &str,
    column: &str,
    actual: &std::collections::BTreeMap<String, SourceColumn>,
    expected: SemanticType,
) -> ConfigResult<()> {
    let _ = config;
    let actual_col = actual.get(column).ok_or_else(|| ConfigurationError::LiveTableMissingColumn {
        table: table.to_string(),
        column: column.to_string(),
    })?;
    if !type_families_compatible(expected, actual_col.semantic_type) {
        return Err(ConfigurationError::LiveTableTypeMismatch {
            table: table.to_string(),
            column: column.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual_col.semantic_type),
        });
    }
    Ok(())
}

/// Whether two semantic types belong to the same type family (integer,
/// string, floating-point, datetime). Exact matches always pass; this
/// tolerates e.g. `Integer` vs `BigInt` the way SQLite type affinity does
/// (mirrors the `types_compatible` idea this crate's teacher used for its
/// own schema-drift detection).
fn type_families_compatible(expected: SemanticType, actual: SemanticType) -> bool {
    use SemanticType::*;
    if expected == actual {
        return true;
    }
    matches!(
        (expected, actual),
        (Integer | BigInt | SmallInt, Integer | BigInt | SmallInt)
            | (String | Text | Guid, String | Text | Guid)
            | (Decimal | Float, Decimal | Float)
            | (DateTime | Date | Time, DateTime | Date | Time)
            | (Blob | Binary, Blob | Binary)
    )
}

async fn table_exists(conn: &Connection, table: &str) -> ConfigResult<bool> {
    let exists = match conn.dialect().name() {
        "mysql" => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = ?",
            )
            .bind(table)
            .fetch_one(conn.pool())
            .await?
                > 0
        }
        "sqlite" => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(table)
                .fetch_one(conn.pool())
                .await?
                > 0
        }
        other => return Err(ConfigurationError::UnsupportedDialect(other.to_string())),
    };
    Ok(exists)
}

fn build_create_live_table_sql(config: &Config, source_types: &HashMap<String, SemanticType>) -> String {
    let conn = &config.target_connection;
    let dialect = conn.dialect();
    let mut cols = Vec::new();

    for (source, target) in &config.primary_key_column_map {
        let t = source_types.get(source.as_str()).copied().unwrap_or(SemanticType::String);
        cols.push(format!("{} {}", dialect.quote_ident(target), dialect.column_sql_type(&t, None, None, None)));
    }
    for target in config.data_target_columns() {
        let t = expected_data_column_type(config, source_types, &target);
        cols.push(format!("{} {}", dialect.quote_ident(&target), dialect.column_sql_type(&t, None, None, None)));
    }

    let id_type = dialect.column_sql_type(&config.target_id_column_type, None, None, None);
    cols.push(format!(
        "{} {} PRIMARY KEY {}",
        dialect.quote_ident(&config.metadata_columns.id),
        id_type,
        autoincrement_clause(dialect.name()),
    ));
    cols.push(format!(
        "{} {} NOT NULL",
        dialect.quote_ident(&config.metadata_columns.content_hash),
        dialect.column_sql_type(&config.target_hash_column_type, Some(config.target_hash_column_length), None, None),
    ));
    cols.push(format!(
        "{} {} NOT NULL DEFAULT '{}'",
        dialect.quote_ident(&config.metadata_columns.created_at),
        dialect.column_sql_type(&SemanticType::DateTime, None, None, None),
        config.placeholder_datetime,
    ));
    cols.push(format!(
        "{} {} NOT NULL DEFAULT '{}'",
        dialect.quote_ident(&config.metadata_columns.updated_at),
        dialect.column_sql_type(&SemanticType::DateTime, None, None, None),
        config.placeholder_datetime,
    ));
    cols.push(format!(
        "{} {} NULL",
        dialect.quote_ident(&config.metadata_columns.batch_revision),
        dialect.column_sql_type(&SemanticType::Integer, None, None, None),
    ));

    format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&config.target_live_table_name),
        cols.join(", "),
    )
}

fn build_create_temp_table_sql(config: &Config, source_types: &HashMap<String, SemanticType>) -> String {
    let conn = &config.target_connection;
    let dialect = conn.dialect();
    let mut cols = Vec::new();
    let pk_targets = config.pk_target_columns();

    for (source, target) in &config.primary_key_column_map {
        let t = source_types.get(source.as_str()).copied().unwrap_or(SemanticType::String);
        cols.push(format!("{} {} NOT NULL", dialect.quote_ident(target), dialect.column_sql_type(&t, None, None, None)));
    }
    for target in config.data_target_columns() {
        let t = expected_data_column_type(config, source_types, &target);
        cols.push(format!("{} {}", dialect.quote_ident(&target), dialect.column_sql_type(&t, None, None, None)));
    }
    cols.push(format!(
        "{} {} NULL",
        dialect.quote_ident(&config.metadata_columns.content_hash),
        dialect.column_sql_type(&config.target_hash_column_type, Some(config.target_hash_column_length), None, None),
    ));
    cols.push(format!(
        "{} {} NOT NULL DEFAULT '{}'",
        dialect.quote_ident(&config.metadata_columns.created_at),
        dialect.column_sql_type(&SemanticType::DateTime, None, None, None),
        config.placeholder_datetime,
    ));

    let pk_clause = format!(
        "PRIMARY KEY ({})",
        pk_targets.iter().map(|c| dialect.quote_ident(c)).collect::<Vec<_>>().join(", "),
    );
    cols.push(pk_clause);

    format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&config.target_temp_table_name),
        cols.join(", "),
    )
}

fn autoincrement_clause(dialect_name: &str) -> &'static str {
    match dialect_name {
        "mysql" => "AUTO_INCREMENT",
        "sqlite" => "AUTOINCREMENT",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    async fn sqlite_config() -> Config {
        let source = crate::connection::test_sqlite_memory().await;
        let target = source.clone();
        ConfigBuilder::default()
            .source_connection(source)
            .target_connection(target)
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .hash_column("name")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn prepare_temp_table_is_idempotent() {
        let config = sqlite_config().await;
        sqlx::query("CREATE TABLE src (id INTEGER, name TEXT)").execute(config.source_connection.pool()).await.unwrap();

        let manager = SchemaManager::new();
        manager.prepare_temp_table(&config).await.unwrap();
        manager.prepare_temp_table(&config).await.unwrap();

        let exists = table_exists(&config.target_connection, "live_temp").await.unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn drop_temp_table_is_idempotent_when_absent() {
        let config = sqlite_config().await;
        let manager = SchemaManager::new();
        manager.drop_temp_table(&config).await.unwrap();
        manager.drop_temp_table(&config).await.unwrap();
    }

    /// Scenario 6 setup: a source with an extra `updated_ts` data column,
    /// mapped into the live table under the same name.
    async fn sqlite_config_with_updated_ts_column() -> Config {
        let source = crate::connection::test_sqlite_memory().await;
        let target = source.clone();
        sqlx::query("CREATE TABLE src (id INTEGER, name TEXT, updated_ts TEXT)").execute(source.pool()).await.unwrap();
        ConfigBuilder::default()
            .source_connection(source)
            .target_connection(target)
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .data_column("updated_ts", "updated_ts")
            .hash_column("name")
            .non_nullable_datetime_column("updated_ts")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn ensure_live_table_reports_missing_column() {
        // Scenario 6: live table pre-exists but lacks target column
        // `updated_ts`. `ensure_live_table` must name it and make no writes.
        let config = sqlite_config_with_updated_ts_column().await;
        sqlx::query(
            "CREATE TABLE live (pk INTEGER, name TEXT, id INTEGER PRIMARY KEY, content_hash TEXT NOT NULL, \
             created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', updated_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', \
             batch_revision INTEGER)",
        )
        .execute(config.target_connection.pool())
        .await
        .unwrap();

        let manager = SchemaManager::new();
        let err = manager.ensure_live_table(&config).await;
        assert!(
            matches!(&err, Err(ConfigurationError::LiveTableMissingColumn { table, column }) if table == "live" && column == "updated_ts"),
            "expected LiveTableMissingColumn naming 'updated_ts', got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn ensure_live_table_reports_type_mismatch() {
        // Same scenario, but `updated_ts` is present with an incompatible
        // type family (INTEGER vs. the source's TEXT).
        let config = sqlite_config_with_updated_ts_column().await;
        sqlx::query(
            "CREATE TABLE live (pk INTEGER, name TEXT, updated_ts INTEGER, id INTEGER PRIMARY KEY, content_hash TEXT NOT NULL, \
             created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', updated_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', \
             batch_revision INTEGER)",
        )
        .execute(config.target_connection.pool())
        .await
        .unwrap();

        let manager = SchemaManager::new();
        let err = manager.ensure_live_table(&config).await;
        assert!(
            matches!(&err, Err(ConfigurationError::LiveTableTypeMismatch { table, column, .. }) if table == "live" && column == "updated_ts"),
            "expected LiveTableTypeMismatch naming 'updated_ts', got {:?}",
            err
        );
    }
}
