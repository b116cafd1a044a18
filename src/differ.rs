//! Differ/Applier — reconciles `live` against `temp`
//! using set-based DML.
//!
//! Normally this owns its own transaction end to end: begin, apply, commit
//! or rollback. Per spec §4.6/§5, if the caller has marked the target
//! connection as already inside an externally managed transaction (see
//! [`crate::Connection::enter_external_transaction`]), the Differ/Applier
//! instead participates without issuing its own begin/commit, and does not
//! roll back on error — the outer owner is responsible for both.
//!
//! Phase A (empty-live fast path) runs alone. Otherwise phases B, C, D run
//! in that order: update changed rows, delete orphaned rows, insert new
//! rows.

use crate::config::Config;
use crate::dialect::DiffPlan;
use crate::error::{Result, SyncError};
use crate::report::Report;
use sqlx::any::AnyPool;
use sqlx::Any;
use tracing::{info, warn};

/// The two contexts phases A–D can run under: a transaction this module
/// owns (begin/commit/rollback are ours to call), or the shared pool when
/// the caller already owns a transaction on this connection externally.
enum ApplyContext<'a> {
    Owned(sqlx::Transaction<'a, Any>),
    External(&'a AnyPool),
}

impl<'a> ApplyContext<'a> {
    async fn count_live(&mut self, table: &str, dialect: &dyn crate::dialect::Dialect) -> std::result::Result<i64, sqlx::Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", dialect.quote_ident(table));
        match self {
            ApplyContext::Owned(tx) => sqlx::query_scalar(&sql).fetch_one(&mut **tx).await,
            ApplyContext::External(pool) => sqlx::query_scalar(&sql).fetch_one(*pool).await,
        }
    }

    async fn exec(&mut self, sql: &str, batch_revision_id: Option<i64>) -> std::result::Result<u64, sqlx::Error> {
        let mut query = sqlx::query(sql);
        if let Some(id) = batch_revision_id {
            query = query.bind(id);
        }
        let result = match self {
            ApplyContext::Owned(tx) => query.execute(&mut **tx).await?,
            ApplyContext::External(pool) => query.execute(*pool).await?,
        };
        Ok(result.rows_affected())
    }
}

/// Apply the temp table's contents onto the live table and record the
/// touched row counts on `report`.
pub async fn apply(config: &Config, batch_revision_id: i64, report: &mut Report) -> Result<()> {
    let plan = diff_plan(config);
    let dialect = config.target_connection.dialect_arc();
    let pool = config.target_connection.pool();

    let external = config.target_connection.in_external_transaction();
    let mut ctx = if external {
        ApplyContext::External(pool)
    } else {
        let tx = pool.begin().await.map_err(|e| SyncError::Transaction { phase: "begin", action: "begin", source: e })?;
        ApplyContext::Owned(tx)
    };

    let live_count = ctx
        .count_live(&plan.live_table, dialect.as_ref())
        .await
        .map_err(|e| SyncError::Apply { phase: "count_live", table: plan.live_table.clone(), source: e })?;

    let result = if live_count == 0 {
        apply_initial_insert(&mut ctx, &plan, dialect.as_ref(), batch_revision_id, report).await
    } else {
        apply_incremental(&mut ctx, &plan, dialect.as_ref(), batch_revision_id, report).await
    };

    match ctx {
        ApplyContext::External(_) => {
            // The caller owns this transaction: no commit, and no rollback
            // on error — `result`'s error (if any) propagates as-is and the
            // outer owner decides whether to roll back.
            result
        }
        ApplyContext::Owned(tx) => match result {
            Ok(()) => {
                tx.commit().await.map_err(|e| SyncError::Transaction { phase: "apply", action: "commit", source: e })?;
                Ok(())
            }
            Err(e) => {
                // Best-effort rollback; sqlx also rolls back on Transaction
                // drop, but we try explicitly so a rollback failure can be
                // logged without masking the original apply error.
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after apply error; original error still reported");
                }
                Err(e)
            }
        },
    }
}

async fn apply_initial_insert(
    ctx: &mut ApplyContext<'_>,
    plan: &DiffPlan,
    dialect: &dyn crate::dialect::Dialect,
    batch_revision_id: i64,
    report: &mut Report,
) -> Result<()> {
    let sql = dialect.initial_insert_sql(plan);
    let rows = ctx
        .exec(&sql, Some(batch_revision_id))
        .await
        .map_err(|e| SyncError::Apply { phase: "initial_insert", table: plan.live_table.clone(), source: e })?;
    report.initial_insert_count = rows;
    info!(rows = report.initial_insert_count, "phase A: initial insert (empty live table)");
    Ok(())
}

async fn apply_incremental(
    ctx: &mut ApplyContext<'_>,
    plan: &DiffPlan,
    dialect: &dyn crate::dialect::Dialect,
    batch_revision_id: i64,
    report: &mut Report,
) -> Result<()> {
    let update_sql = dialect.update_changed_sql(plan);
    let updated = ctx
        .exec(&update_sql, Some(batch_revision_id))
        .await
        .map_err(|e| SyncError::Apply { phase: "update_changed", table: plan.live_table.clone(), source: e })?;
    report.updated_count = updated;
    info!(rows = report.updated_count, "phase B: update changed");

    let delete_sql = dialect.delete_orphaned_sql(plan);
    let deleted = ctx
        .exec(&delete_sql, None)
        .await
        .map_err(|e| SyncError::Apply { phase: "delete_orphaned", table: plan.live_table.clone(), source: e })?;
    report.deleted_count = deleted;
    info!(rows = report.deleted_count, "phase C: delete orphaned");

    let insert_sql = dialect.insert_new_sql(plan);
    let inserted = ctx
        .exec(&insert_sql, Some(batch_revision_id))
        .await
        .map_err(|e| SyncError::Apply { phase: "insert_new", table: plan.live_table.clone(), source: e })?;
    report.inserted_count = inserted;
    info!(rows = report.inserted_count, "phase D: insert new");

    Ok(())
}

fn diff_plan(config: &Config) -> DiffPlan {
    DiffPlan {
        live_table: config.target_live_table_name.clone(),
        temp_table: config.target_temp_table_name.clone(),
        pk_columns: config.pk_target_columns(),
        data_columns: config.data_target_columns(),
        content_hash_column: config.metadata_columns.content_hash.clone(),
        created_at_column: config.metadata_columns.created_at.clone(),
        updated_at_column: config.metadata_columns.updated_at.clone(),
        batch_revision_column: config.metadata_columns.batch_revision.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    async fn config_with_live_and_temp() -> Config {
        let conn = crate::connection::test_sqlite_memory().await;
        sqlx::query(
            "CREATE TABLE live (pk INTEGER, name TEXT, content_hash TEXT, \
             created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', \
             updated_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', batch_revision INTEGER, PRIMARY KEY (pk))",
        )
        .execute(conn.pool())
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE live_temp (pk INTEGER NOT NULL, name TEXT, content_hash TEXT NULL, \
             created_at TEXT NOT NULL DEFAULT '2222-02-22 00:00:00', PRIMARY KEY (pk))",
        )
        .execute(conn.pool())
        .await
        .unwrap();

        ConfigBuilder::default()
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
            .unwrap()
    }

    #[tokio::test]
    async fn empty_live_table_takes_initial_insert_fast_path() {
        let config = config_with_live_and_temp().await;
        sqlx::query("INSERT INTO live_temp (pk, name, content_hash) VALUES (1, 'a', 'h1'), (2, 'b', 'h2')")
            .execute(config.target_connection.pool())
            .await
            .unwrap();

        let mut report = Report::default();
        apply(&config, 7, &mut report).await.unwrap();

        assert_eq!(report.initial_insert_count, 2);
        assert_eq!(report.updated_count, 0);
        assert_eq!(report.inserted_count, 0);
        assert_eq!(report.deleted_count, 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live").fetch_one(config.target_connection.pool()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn reconciles_updates_deletes_and_inserts() {
        let config = config_with_live_and_temp().await;
        // live has pk=1 (stale hash), pk=2 (orphan, absent from temp)
        sqlx::query("INSERT INTO live (pk, name, content_hash, batch_revision) VALUES (1, 'old', 'hash-old', 1), (2, 'gone', 'hash-gone', 1)")
            .execute(config.target_connection.pool())
            .await
            .unwrap();
        // temp has pk=1 (changed), pk=3 (new)
        sqlx::query("INSERT INTO live_temp (pk, name, content_hash) VALUES (1, 'new', 'hash-new'), (3, 'fresh', 'hash-fresh')")
            .execute(config.target_connection.pool())
            .await
            .unwrap();

        let mut report = Report::default();
        apply(&config, 9, &mut report).await.unwrap();

        assert_eq!(report.updated_count, 1);
        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.inserted_count, 1);

        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM live ORDER BY pk").fetch_all(config.target_connection.pool()).await.unwrap();
        assert_eq!(names, vec!["new".to_string(), "fresh".to_string()]);

        let revisions: Vec<i64> =
            sqlx::query_scalar("SELECT batch_revision FROM live ORDER BY pk").fetch_all(config.target_connection.pool()).await.unwrap();
        assert!(revisions.iter().all(|r| *r == 9));
    }

    #[tokio::test]
    async fn no_op_when_live_already_matches_temp() {
        let config = config_with_live_and_temp().await;
        sqlx::query("INSERT INTO live (pk, name, content_hash, batch_revision) VALUES (1, 'same', 'hash-same', 1)")
            .execute(config.target_connection.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO live_temp (pk, name, content_hash) VALUES (1, 'same', 'hash-same')")
            .execute(config.target_connection.pool())
            .await
            .unwrap();

        let mut report = Report::default();
        apply(&config, 3, &mut report).await.unwrap();

        assert_eq!(report.updated_count, 0);
        assert_eq!(report.deleted_count, 0);
        assert_eq!(report.inserted_count, 0);
    }

    #[tokio::test]
    async fn participates_in_externally_managed_transaction_without_owning_it() {
        let config = config_with_live_and_temp().await;
        sqlx::query("INSERT INTO live_temp (pk, name, content_hash) VALUES (1, 'a', 'h1')")
            .execute(config.target_connection.pool())
            .await
            .unwrap();

        let guard = config.target_connection.enter_external_transaction();
        assert!(config.target_connection.in_external_transaction());

        let mut report = Report::default();
        apply(&config, 1, &mut report).await.unwrap();
        assert_eq!(report.initial_insert_count, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM live").fetch_one(config.target_connection.pool()).await.unwrap();
        assert_eq!(count, 1, "apply still takes effect when participating in a caller-owned transaction");

        drop(guard);
        assert!(!config.target_connection.in_external_transaction());
    }
}
