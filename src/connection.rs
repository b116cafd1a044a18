//! Connection collaborator.
//!
//! Wraps an `sqlx::AnyPool` together with the [`Dialect`] it was detected
//! to speak, so source and target connections share one type regardless of
//! which of the two supported backends either one is.

use crate::dialect::{dialect_for_any_kind, Dialect};
use crate::error::ConfigResult;
use sqlx::any::AnyPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A connection capable of executing parameterized statements,
/// introspecting schema, reporting its dialect, and managing transactions.
///
/// `transaction_depth` is shared across every [`Clone`] of a `Connection`
/// (it lives behind an `Arc`), so a caller that clones a `Connection` into a
/// [`crate::Config`] and separately holds on to its own copy still shares
/// one counter with it — see [`Connection::enter_external_transaction`].
#[derive(Clone)]
pub struct Connection {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
    transaction_depth: Arc<AtomicUsize>,
}

impl Connection {
    /// Open a pooled connection and detect its dialect. Accepts any URL
    /// `sqlx::Any` understands for the drivers compiled in (`mysql://`,
    /// `sqlite::memory:`, `sqlite://path`).
    pub async fn connect(url: &str) -> ConfigResult<Self> {
        ensure_any_drivers_installed();
        let pool = AnyPool::connect(url).await?;
        Self::from_pool(pool)
    }

    /// Wrap an already-open pool, detecting its dialect from
    /// [`sqlx::any::AnyKind`].
    pub fn from_pool(pool: AnyPool) -> ConfigResult<Self> {
        let dialect = dialect_for_any_kind(pool.any_kind())?;
        Ok(Self { pool, dialect, transaction_depth: Arc::new(AtomicUsize::new(0)) })
    }

    /// Tell this connection that the caller has already opened a
    /// transaction it considers externally managed — e.g. `sync` is being
    /// invoked as one step inside a larger caller-owned unit of work.
    ///
    /// Per spec §4.6/§5: when this returns a live guard, the Differ/Applier
    /// participates in that transaction without issuing its own
    /// begin/commit, and does not roll back on error — the outer owner is
    /// responsible for both. Drop the returned guard to mark the external
    /// transaction as no longer active.
    pub fn enter_external_transaction(&self) -> ExternalTransactionGuard {
        self.transaction_depth.fetch_add(1, Ordering::SeqCst);
        ExternalTransactionGuard { depth: Arc::clone(&self.transaction_depth) }
    }

    /// Whether a caller has marked a transaction on this connection as
    /// externally managed via [`Connection::enter_external_transaction`].
    pub fn in_external_transaction(&self) -> bool {
        self.transaction_depth.load(Ordering::SeqCst) > 0
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn dialect_arc(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        self.dialect.quote_ident(ident)
    }

    /// Name of the database currently selected on this connection, used
    /// only for error messages. Best-effort: returns
    /// `"<unknown>"` rather than failing if the dialect has no portable way
    /// to ask.
    pub async fn current_database_name(&self) -> String {
        let sql = match self.dialect.name() {
            "mysql" => "SELECT DATABASE()",
            "sqlite" => "SELECT 'main'",
            _ => return "<unknown>".to_string(),
        };
        sqlx::query_scalar::<_, Option<String>>(sql)
            .fetch_one(&self.pool)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.dialect.name())
            .field("transaction_depth", &self.transaction_depth.load(Ordering::SeqCst))
            .finish()
    }
}

/// Returned by [`Connection::enter_external_transaction`]. Marks the
/// transaction as no longer externally active when dropped.
pub struct ExternalTransactionGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for ExternalTransactionGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `sqlx::Any` requires its per-backend drivers to be installed once,
/// process-wide, before the first connection is opened.
fn ensure_any_drivers_installed() {
    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Test-only helper: an in-memory SQLite connection pinned to a single
/// pooled connection, so the in-memory database isn't silently swapped out
/// from under a test when the pool hands back a second connection
/// (`sqlite::memory:` creates a fresh, empty database per connection).
#[cfg(test)]
pub(crate) async fn test_sqlite_memory() -> Connection {
    use sqlx::any::AnyPoolOptions;
    ensure_any_drivers_installed();
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite connects");
    Connection::from_pool(pool).expect("sqlite dialect detected")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn external_transaction_guard_tracks_depth_and_is_shared_across_clones() {
        let conn = test_sqlite_memory().await;
        let cloned = conn.clone();
        assert!(!conn.in_external_transaction());

        let guard = conn.enter_external_transaction();
        assert!(conn.in_external_transaction());
        assert!(cloned.in_external_transaction(), "clones share the same counter");

        drop(guard);
        assert!(!conn.in_external_transaction());
    }
}
