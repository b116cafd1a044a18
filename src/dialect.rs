//! Dialect seam — resolves SQL dialect portability between backends.
//! See `DESIGN.md` for the rationale behind the two concrete
//! implementations below.
//!
//! Every piece of SQL this crate emits that differs between engines (quoting,
//! `CAST(.. AS TEXT)`, the native hash function, and the Phase B–D join
//! forms) is generated through this trait rather than
//! hand-formatted at each call site.

use crate::config::SemanticType;
use std::fmt::Write as _;

/// A column pair used when building the Phase A–D statements: a live/temp
/// column name and whether it participates in the business primary key.
#[derive(Debug, Clone)]
pub struct DiffPlan {
    pub live_table: String,
    pub temp_table: String,
    /// Business PK target column names, in declared order.
    pub pk_columns: Vec<String>,
    /// Remaining (non-PK) data target column names, in declared order.
    pub data_columns: Vec<String>,
    pub content_hash_column: String,
    pub created_at_column: String,
    pub updated_at_column: String,
    pub batch_revision_column: String,
}

impl DiffPlan {
    fn all_insert_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::with_capacity(self.pk_columns.len() + self.data_columns.len() + 3);
        cols.extend(self.pk_columns.iter().map(String::as_str));
        cols.extend(self.data_columns.iter().map(String::as_str));
        cols.push(&self.content_hash_column);
        cols.push(&self.created_at_column);
        cols
    }

    /// First PK column by declared order — used for the anti-join NULL probe
    /// in Phase C and Phase D.
    pub fn first_pk_column(&self) -> &str {
        self.pk_columns
            .first()
            .expect("DiffPlan always has at least one PK column")
    }
}

/// Dialect-specific SQL generation and type mapping. One implementation per
/// supported backend; see `DESIGN.md` for which ones ship and why.
pub trait Dialect: Send + Sync {
    /// Human-readable name, used in error messages and logs.
    fn name(&self) -> &'static str;

    /// Quote a bare identifier for safe inclusion in generated SQL.
    fn quote_ident(&self, ident: &str) -> String;

    /// Maximum identifier length this dialect accepts; used to truncate
    /// derived index names (§4.3).
    fn identifier_max_len(&self) -> usize;

    /// Render `CAST(<expr> AS <dialect's text type>)`.
    fn cast_to_text(&self, expr: &str) -> String;

    /// Render the dialect's native string-concatenation of `parts`,
    /// already individually cast/coalesced.
    fn concat(&self, parts: &[String]) -> String;

    /// The dialect's DDL type name for a semantic column type, given an
    /// optional length/precision/scale override.
    fn column_sql_type(&self, semantic: &SemanticType, length: Option<u32>, precision: Option<u32>, scale: Option<u32>) -> String;

    /// Best-effort classification of a native catalog type name into the
    /// closed semantic-type set.
    fn classify_native_type(&self, native: &str) -> SemanticType;

    /// `CURRENT_TIMESTAMP`-equivalent literal for this dialect.
    fn current_timestamp_expr(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    /// If the dialect can compute SHA-256 hex in a single set-based
    /// statement (MySQL's `SHA2`, Postgres' `pgcrypto digest`), return the
    /// wrapping expression around `concat_expr`. `None` means the caller
    /// must fall back to an application-side strategy (see `src/hasher.rs`).
    fn native_sha256_hex_expr(&self, concat_expr: &str) -> Option<String>;

    /// Whether [`native_sha256_hex_expr`](Dialect::native_sha256_hex_expr)
    /// can produce a statement for this dialect, without having to build a
    /// throwaway expression just to probe it.
    fn supports_native_sha256(&self) -> bool {
        self.native_sha256_hex_expr("probe").is_some()
    }

    /// Whether this dialect supports `UPDATE t1 JOIN t2 ON .. SET ..` and
    /// `DELETE t1 FROM t1 JOIN t2 ..` (MySQL extension). Drives which of
    /// the two SQL shapes below gets generated.
    fn supports_update_delete_join(&self) -> bool;

    fn initial_insert_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let insert_cols: Vec<String> = plan
            .all_insert_columns()
            .into_iter()
            .map(|c| self.quote_ident(c))
            .collect();
        let select_cols = insert_cols.join(", ");
        let batch_col = self.quote_ident(&plan.batch_revision_column);
        format!(
            "INSERT INTO {live} ({cols}, {batch_col}) SELECT {select_cols}, ? FROM {temp}",
            live = live,
            cols = insert_cols.join(", "),
            batch_col = batch_col,
            select_cols = select_cols,
            temp = temp,
        )
    }

    fn update_changed_sql(&self, plan: &DiffPlan) -> String {
        if self.supports_update_delete_join() {
            self.update_changed_join_sql(plan)
        } else {
            self.update_changed_correlated_sql(plan)
        }
    }

    fn update_changed_join_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let on_clause = pk_join_condition(self, &plan.pk_columns, "live", "temp");
        let mut set_clause = String::new();
        for col in &plan.data_columns {
            let q = self.quote_ident(col);
            let _ = write!(set_clause, "live.{q} = temp.{q}, ", q = q);
        }
        let hash_col = self.quote_ident(&plan.content_hash_column);
        let updated_col = self.quote_ident(&plan.updated_at_column);
        let batch_col = self.quote_ident(&plan.batch_revision_column);
        let _ = write!(
            set_clause,
            "live.{hash_col} = temp.{hash_col}, live.{updated_col} = {ts}, live.{batch_col} = ?",
            hash_col = hash_col,
            updated_col = updated_col,
            batch_col = batch_col,
            ts = self.current_timestamp_expr(),
        );
        format!(
            "UPDATE {live} live JOIN {temp} temp ON {on} SET {set} WHERE live.{hash_col} <> temp.{hash_col}",
            live = live,
            temp = temp,
            on = on_clause,
            set = set_clause,
            hash_col = hash_col,
        )
    }

    fn update_changed_correlated_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let corr = pk_join_condition(self, &plan.pk_columns, &plan.live_table, &plan.temp_table);
        let mut set_clause = String::new();
        for col in &plan.data_columns {
            let q = self.quote_ident(col);
            let _ = write!(
                set_clause,
                "{q} = (SELECT {q} FROM {temp} WHERE {corr}), ",
                q = q,
                temp = temp,
                corr = corr,
            );
        }
        let hash_col = self.quote_ident(&plan.content_hash_column);
        let updated_col = self.quote_ident(&plan.updated_at_column);
        let batch_col = self.quote_ident(&plan.batch_revision_column);
        let _ = write!(
            set_clause,
            "{hash_col} = (SELECT {hash_col} FROM {temp} WHERE {corr}), {updated_col} = {ts}, {batch_col} = ?",
            hash_col = hash_col,
            temp = temp,
            corr = corr,
            updated_col = updated_col,
            batch_col = batch_col,
            ts = self.current_timestamp_expr(),
        );
        format!(
            "UPDATE {live} SET {set} WHERE EXISTS (SELECT 1 FROM {temp} WHERE {corr}) \
             AND {hash_col} <> (SELECT {hash_col} FROM {temp} WHERE {corr})",
            live = live,
            set = set_clause,
            temp = temp,
            corr = corr,
            hash_col = hash_col,
        )
    }

    fn delete_orphaned_sql(&self, plan: &DiffPlan) -> String {
        if self.supports_update_delete_join() {
            self.delete_orphaned_join_sql(plan)
        } else {
            self.delete_orphaned_correlated_sql(plan)
        }
    }

    fn delete_orphaned_join_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let on_clause = pk_join_condition(self, &plan.pk_columns, "live", "temp");
        let first_pk = self.quote_ident(plan.first_pk_column());
        format!(
            "DELETE live FROM {live} live LEFT JOIN {temp} temp ON {on} WHERE temp.{pk} IS NULL",
            live = live,
            temp = temp,
            on = on_clause,
            pk = first_pk,
        )
    }

    fn delete_orphaned_correlated_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let corr = pk_join_condition(self, &plan.pk_columns, &plan.live_table, &plan.temp_table);
        format!(
            "DELETE FROM {live} WHERE NOT EXISTS (SELECT 1 FROM {temp} WHERE {corr})",
            live = live,
            temp = temp,
            corr = corr,
        )
    }

    fn insert_new_sql(&self, plan: &DiffPlan) -> String {
        let live = self.quote_ident(&plan.live_table);
        let temp = self.quote_ident(&plan.temp_table);
        let on_clause = pk_join_condition(self, &plan.pk_columns, "live", "temp");
        let first_pk = self.quote_ident(plan.first_pk_column());
        let insert_cols: Vec<String> = plan
            .all_insert_columns()
            .into_iter()
            .map(|c| self.quote_ident(c))
            .collect();
        let select_cols: Vec<String> = plan
            .all_insert_columns()
            .into_iter()
            .map(|c| format!("temp.{}", self.quote_ident(c)))
            .collect();
        let batch_col = self.quote_ident(&plan.batch_revision_column);
        format!(
            "INSERT INTO {live} ({cols}, {batch_col}) SELECT {select_cols}, ? FROM {temp} temp \
             LEFT JOIN {live} live ON {on} WHERE live.{pk} IS NULL",
            live = live,
            cols = insert_cols.join(", "),
            batch_col = batch_col,
            select_cols = select_cols.join(", "),
            temp = temp,
            on = on_clause,
            pk = first_pk,
        )
    }
}

/// `live.pk1 = temp.pk1 AND live.pk2 = temp.pk2 ...`, qualified with the
/// given left/right aliases (which may be the bare table names when no
/// alias is used, as in the correlated-subquery forms).
fn pk_join_condition(dialect: &(impl Dialect + ?Sized), pk_columns: &[String], left_alias: &str, right_alias: &str) -> String {
    pk_columns
        .iter()
        .map(|c| {
            let q = dialect.quote_ident(c);
            format!("{left}.{q} = {right}.{q}", left = left_alias, right = right_alias, q = q)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// MySQL / MariaDB — the primary dialect (see `DESIGN.md`). The
/// `UPDATE .. JOIN ..` / `DELETE .. FROM .. JOIN ..` forms are written
/// verbatim for this family.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn identifier_max_len(&self) -> usize {
        64
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("CAST({} AS CHAR)", expr)
    }

    fn concat(&self, parts: &[String]) -> String {
        format!("CONCAT({})", parts.join(", "))
    }

    fn column_sql_type(&self, semantic: &SemanticType, length: Option<u32>, precision: Option<u32>, scale: Option<u32>) -> String {
        use SemanticType::*;
        match semantic {
            Integer => "INT".to_string(),
            BigInt => "BIGINT".to_string(),
            SmallInt => "SMALLINT".to_string(),
            Boolean => "TINYINT(1)".to_string(),
            String => format!("VARCHAR({})", length.unwrap_or(255)),
            Text => "TEXT".to_string(),
            Decimal => format!("DECIMAL({},{})", precision.unwrap_or(18), scale.unwrap_or(4)),
            Float => "DOUBLE".to_string(),
            DateTime => "DATETIME".to_string(),
            Date => "DATE".to_string(),
            Time => "TIME".to_string(),
            Blob => "BLOB".to_string(),
            Binary => format!("VARBINARY({})", length.unwrap_or(255)),
            Json => "JSON".to_string(),
            Guid => "CHAR(36)".to_string(),
        }
    }

    fn classify_native_type(&self, native: &str) -> SemanticType {
        let t = native.to_ascii_lowercase();
        if t.contains("bigint") {
            SemanticType::BigInt
        } else if t.contains("smallint") || t.contains("tinyint") {
            SemanticType::SmallInt
        } else if t.contains("int") {
            SemanticType::Integer
        } else if t.contains("bool") {
            SemanticType::Boolean
        } else if t.contains("decimal") || t.contains("numeric") {
            SemanticType::Decimal
        } else if t.contains("float") || t.contains("double") || t.contains("real") {
            SemanticType::Float
        } else if t.contains("datetime") || t.contains("timestamp") {
            SemanticType::DateTime
        } else if t == "date" {
            SemanticType::Date
        } else if t.contains("time") {
            SemanticType::Time
        } else if t.contains("blob") {
            SemanticType::Blob
        } else if t.contains("binary") {
            SemanticType::Binary
        } else if t.contains("json") {
            SemanticType::Json
        } else if t.contains("text") || t.contains("char") || t.contains("varchar") {
            SemanticType::String
        } else {
            SemanticType::String
        }
    }

    fn native_sha256_hex_expr(&self, concat_expr: &str) -> Option<String> {
        Some(format!("SHA2({}, 256)", concat_expr))
    }

    fn supports_update_delete_join(&self) -> bool {
        true
    }
}

/// SQLite — carried for this crate's own test suite (see `DESIGN.md`);
/// lacks `UPDATE/DELETE .. JOIN ..` and native SHA-256, so Phase B/C are
/// translated to correlated subqueries and the hasher falls back to an
/// application-side strategy (`src/hasher.rs`).
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn identifier_max_len(&self) -> usize {
        128
    }

    fn cast_to_text(&self, expr: &str) -> String {
        format!("CAST({} AS TEXT)", expr)
    }

    fn concat(&self, parts: &[String]) -> String {
        parts.join(" || ")
    }

    fn column_sql_type(&self, semantic: &SemanticType, length: Option<u32>, _precision: Option<u32>, _scale: Option<u32>) -> String {
        use SemanticType::*;
        match semantic {
            Integer | BigInt | SmallInt | Boolean => "INTEGER".to_string(),
            String | Text | Guid | Json => {
                let _ = length;
                "TEXT".to_string()
            }
            Decimal | Float => "REAL".to_string(),
            DateTime | Date | Time => "TIMESTAMP".to_string(),
            Blob | Binary => "BLOB".to_string(),
        }
    }

    fn classify_native_type(&self, native: &str) -> SemanticType {
        let t = native.to_ascii_uppercase();
        if t.contains("INT") {
            SemanticType::Integer
        } else if t.contains("TIMESTAMP") || t.contains("DATETIME") {
            SemanticType::DateTime
        } else if t == "DATE" {
            SemanticType::Date
        } else if t.contains("CHAR") || t.contains("TEXT") || t.contains("CLOB") {
            SemanticType::String
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") || t.contains("DECIMAL") || t.contains("NUMERIC") {
            SemanticType::Float
        } else if t.contains("BLOB") {
            SemanticType::Blob
        } else {
            SemanticType::String
        }
    }

    fn native_sha256_hex_expr(&self, _concat_expr: &str) -> Option<String> {
        None
    }

    fn supports_update_delete_join(&self) -> bool {
        false
    }
}

/// Resolve a `Dialect` implementation from an `sqlx::any::AnyKind`.
pub fn dialect_for_any_kind(kind: sqlx::any::AnyKind) -> crate::error::ConfigResult<std::sync::Arc<dyn Dialect>> {
    use sqlx::any::AnyKind;
    match kind {
        AnyKind::MySql => Ok(std::sync::Arc::new(MySqlDialect)),
        AnyKind::Sqlite => Ok(std::sync::Arc::new(SqliteDialect)),
        other => Err(crate::error::ConfigurationError::UnsupportedDialect(format!("{:?}", other))),
    }
}
