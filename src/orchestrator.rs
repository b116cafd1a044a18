//! Orchestrator.
//!
//! `sync` is the crate's single public entry point. It sequences every
//! collaborator in order and performs best-effort temp-table cleanup no
//! matter how the run ends.

use crate::config::Config;
use crate::differ;
use crate::error::Result;
use crate::hasher;
use crate::index;
use crate::loader;
use crate::report::{LogEntry, Report};
use crate::schema::SchemaManager;
use tracing::{error, info};

/// Bring `config.target_live_table_name` into byte-identical agreement
/// with `config.source_object_name`, stamping every changed live row with
/// `batch_revision_id`.
///
/// Sequence: ensure live table -> prepare temp table -> load -> hash ->
/// index temp -> index live -> diff/apply -> drop temp.
pub async fn sync(config: &Config, batch_revision_id: i64) -> Result<Report> {
    let schema = SchemaManager::new();
    let mut report = Report::default();

    let outcome = run_phases(config, &schema, batch_revision_id, &mut report).await;

    // Best-effort cleanup regardless of success or failure: a failed run
    // should not leave a stale temp table behind for the next invocation
    // to trip over.
    if let Err(e) = schema.drop_temp_table(config).await {
        error!(error = %e, "failed to drop temp table during cleanup");
        report.push(
            LogEntry::warn(format!("temp table cleanup failed: {e}"))
                .with_context("phase", "cleanup")
                .with_context("table", config.target_temp_table_name.as_str()),
        );
    }

    match outcome {
        Ok(()) => {
            info!(
                loaded = report.loaded_count,
                initial_inserted = report.initial_insert_count,
                inserted = report.inserted_count,
                updated = report.updated_count,
                deleted = report.deleted_count,
                "sync complete"
            );
            Ok(report)
        }
        Err(e) => Err(e),
    }
}

async fn run_phases(config: &Config, schema: &SchemaManager, batch_revision_id: i64, report: &mut Report) -> Result<()> {
    info!(source = %config.source_object_name, live = %config.target_live_table_name, "sync starting");

    schema.ensure_live_table(config).await?;
    report.push(
        LogEntry::info(format!("live table '{}' ready", config.target_live_table_name))
            .with_context("phase", "ensure_live")
            .with_context("table", config.target_live_table_name.as_str()),
    );

    schema.prepare_temp_table(config).await?;
    report.push(
        LogEntry::info(format!("temp table '{}' prepared", config.target_temp_table_name))
            .with_context("phase", "prepare_temp")
            .with_context("table", config.target_temp_table_name.as_str()),
    );

    let loaded = loader::load(config, schema).await?;
    report.loaded_count = loaded;
    report.push(
        LogEntry::info(format!("loaded {loaded} row(s) from '{}'", config.source_object_name))
            .with_context("phase", "load")
            .with_context("table", config.target_temp_table_name.as_str())
            .with_context("rows", loaded.to_string()),
    );

    hasher::populate_content_hash(config).await?;
    report.push(
        LogEntry::info("content hashes populated".to_string())
            .with_context("phase", "hash")
            .with_context("table", config.target_temp_table_name.as_str()),
    );

    index::add_indices_to_temp_table_after_load(config).await?;
    index::add_indices_to_live_table(config).await?;
    report.push(
        LogEntry::info("indices ensured on temp and live tables".to_string())
            .with_context("phase", "index")
            .with_context("temp_table", config.target_temp_table_name.as_str())
            .with_context("live_table", config.target_live_table_name.as_str()),
    );

    differ::apply(config, batch_revision_id, report).await?;
    report.push(
        LogEntry::info(format!(
            "applied: {} initial, {} inserted, {} updated, {} deleted",
            report.initial_insert_count, report.inserted_count, report.updated_count, report.deleted_count
        ))
        .with_context("phase", "apply")
        .with_context("table", config.target_live_table_name.as_str()),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    #[tokio::test]
    async fn full_sync_creates_and_populates_live_table_from_scratch() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE src (id INTEGER, name TEXT, note TEXT)").execute(conn.pool()).await.unwrap();
        sqlx::query("INSERT INTO src (id, name, note) VALUES (1, 'alice', 'x'), (2, 'bob', 'y')")
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
            .data_column("note", "note")
            .hash_column("name")
            .hash_column("note")
            .build()
            .unwrap();

        let report = sync(&config, 1).await.unwrap();
        assert_eq!(report.loaded_count, 2);
        assert_eq!(report.initial_insert_count, 2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live").fetch_one(conn.pool()).await.unwrap();
        assert_eq!(count, 2);

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='live_temp'")
            .fetch_one(conn.pool())
            .await
            .unwrap();
        assert_eq!(exists, 0, "temp table is dropped after a successful run");
    }

    #[tokio::test]
    async fn second_sync_reconciles_changes_against_existing_live_table() {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query("CREATE TABLE src (id INTEGER, name TEXT)").execute(conn.pool()).await.unwrap();
        sqlx::query("INSERT INTO src (id, name) VALUES (1, 'alice'), (2, 'bob')").execute(conn.pool()).await.unwrap();

        let config = ConfigBuilder::default()
            .source_connection(conn.clone())
            .target_connection(conn.clone())
            .source_object_name("src")
            .target_live_table_name("live")
            .target_temp_table_name("live_temp")
            .primary_key_column("id", "pk")
            .data_column("id", "pk")
            .data_column("name", "name")
            .hash_column("name")
            .build()
            .unwrap();

        sync(&config, 1).await.unwrap();

        sqlx::query("UPDATE src SET name = 'alice2' WHERE id = 1").execute(conn.pool()).await.unwrap();
        sqlx::query("DELETE FROM src WHERE id = 2").execute(conn.pool()).await.unwrap();
        sqlx::query("INSERT INTO src (id, name) VALUES (3, 'carol')").execute(conn.pool()).await.unwrap();

        let report = sync(&config, 2).await.unwrap();
        assert_eq!(report.updated_count, 1);
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.inserted_count, 1);

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM live ORDER BY pk").fetch_all(conn.pool()).await.unwrap();
        assert_eq!(names, vec!["alice2".to_string(), "carol".to_string()]);
    }
}
