//! Admin SQL executor.
//!
//! A deliberately narrow escape hatch: project administrators can run
//! arbitrary single statements against their tenant database's **owner**
//! pool, gated by a denylist of privileged operations, an automatic row
//! cap on unbounded `SELECT`s, and a per-statement timeout. The
//! single-statement guard is a textual `;`-split — approximate by design;
//! see the module-level note on its known false positives.

use std::time::Instant;

use sqlx::{Column, PgPool, Row, TypeInfo};

const DANGEROUS_PATTERNS: &[&str] = &[
    "DO $$",
    "PG_SLEEP(",
    "CREATE EXTENSION",
    "DROP DATABASE",
    "DROP ROLE",
    "ALTER SYSTEM",
];

/// `COPY ... TO STDOUT` / `COPY ... FROM STDIN` are ordinary, permitted
/// statements; only `COPY` paired with `PROGRAM` shells out on the server
/// and is denied.
const COPY_PROGRAM_PATTERN: &str = "COPY ... PROGRAM";

#[derive(Debug, thiserror::Error)]
pub enum AdminSqlError {
    #[error("only a single statement is allowed per call")]
    MultipleStatements,

    #[error("statement contains a denied operation: {pattern}")]
    Denied { pattern: &'static str },

    #[error("empty statement")]
    Empty,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdminSqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "rowCount")]
    pub row_count: u64,
    #[serde(rename = "executionTimeMs")]
    pub execution_time_ms: u64,
}

/// Reject a statement containing more than one non-empty `;`-separated
/// segment. A naive textual split — it will reject statements containing a
/// literal semicolon inside a string or comment even though those are
/// legal single statements. That trade-off is accepted: a stricter parser
/// is unnecessary surface area for an admin-only executor, and rejecting a
/// rare legitimate statement is a far smaller risk than ever admitting two.
fn assert_single_statement(sql: &str) -> Result<(), AdminSqlError> {
    let segments = sql.split(';').filter(|s| !s.trim().is_empty()).count();
    if segments == 0 {
        return Err(AdminSqlError::Empty);
    }
    if segments > 1 {
        return Err(AdminSqlError::MultipleStatements);
    }
    Ok(())
}

fn assert_not_denied(sql: &str) -> Result<(), AdminSqlError> {
    let upper = sql.to_uppercase();
    for pattern in DANGEROUS_PATTERNS {
        if upper.contains(pattern) {
            return Err(AdminSqlError::Denied { pattern });
        }
    }
    if upper.contains("COPY") && upper.contains("PROGRAM") {
        return Err(AdminSqlError::Denied {
            pattern: COPY_PROGRAM_PATTERN,
        });
    }
    Ok(())
}

fn is_select_like(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_uppercase();
    trimmed.starts_with("SELECT") || trimmed.starts_with("WITH")
}

fn has_explicit_limit(sql: &str) -> bool {
    sql.to_uppercase().contains("LIMIT")
}

/// Stateless by design: the row cap and statement timeout are
/// runtime-mutable admin settings, so every call takes a fresh snapshot of
/// both rather than freezing them at construction. That keeps a `PATCH
/// /v1/admin/settings` effective on the very next `execute`.
#[derive(Debug, Default)]
pub struct AdminSqlExecutor;

impl AdminSqlExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate and execute `sql` against `owner_pool`, the tenant's owner
    /// privilege tier.
    ///
    /// # Errors
    ///
    /// Returns [`AdminSqlError::MultipleStatements`], [`AdminSqlError::Denied`],
    /// [`AdminSqlError::Empty`], or [`AdminSqlError::Database`] for any
    /// failure surfaced by Postgres itself (propagated as-is so the caller
    /// can report the server's own message).
    pub async fn execute(
        &self,
        owner_pool: &PgPool,
        sql: &str,
        max_rows_per_query: i64,
        statement_timeout_ms: i64,
    ) -> Result<AdminSqlResult, AdminSqlError> {
        assert_single_statement(sql)?;
        assert_not_denied(sql)?;

        let mut statement = sql.trim().trim_end_matches(';').to_owned();
        if is_select_like(&statement) && !has_explicit_limit(&statement) {
            statement.push_str(&format!(" LIMIT {max_rows_per_query}"));
        }

        let mut conn = owner_pool.acquire().await?;
        sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
            .execute(&mut *conn)
            .await?;

        let started = Instant::now();
        let rows = sqlx::query(&statement).fetch_all(&mut *conn).await?;
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_owned()).collect())
            .unwrap_or_default();

        let rendered: Vec<serde_json::Map<String, serde_json::Value>> =
            rows.iter().map(render_row).collect();

        Ok(AdminSqlResult {
            columns,
            row_count: rendered.len() as u64,
            rows: rendered,
            execution_time_ms,
        })
    }
}

fn render_row(row: &sqlx::postgres::PgRow) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT4" | "INT8" | "INT2" => row
                .try_get::<i64, _>(i)
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "BOOL" => row
                .try_get::<bool, _>(i)
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            "JSON" | "JSONB" => row
                .try_get::<serde_json::Value, _>(i)
                .unwrap_or(serde_json::Value::Null),
            _ => row
                .try_get::<String, _>(i)
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
        };
        map.insert(column.name().to_owned(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_multiple_statements() {
        assert!(matches!(
            assert_single_statement("SELECT 1; SELECT 2;"),
            Err(AdminSqlError::MultipleStatements)
        ));
    }

    #[test]
    fn tolerates_a_single_trailing_semicolon() {
        assert!(assert_single_statement("SELECT 1;").is_ok());
    }

    #[test]
    fn rejects_empty_statement() {
        assert!(matches!(
            assert_single_statement("   ;  "),
            Err(AdminSqlError::Empty)
        ));
    }

    #[test]
    fn denylist_catches_known_patterns_case_insensitively() {
        assert!(assert_not_denied("drop database foo").is_err());
        assert!(assert_not_denied("SELECT pg_sleep(10)").is_err());
        assert!(assert_not_denied("ALTER SYSTEM SET foo = 1").is_err());
        assert!(assert_not_denied("SELECT 1").is_ok());
    }

    #[test]
    fn denies_copy_program_but_allows_plain_copy() {
        assert!(assert_not_denied("COPY (SELECT 1) TO PROGRAM 'rm -rf /'").is_err());
        assert!(assert_not_denied("copy users to program 'cat'").is_err());
        assert!(assert_not_denied("COPY users TO STDOUT").is_ok());
        assert!(assert_not_denied("COPY users FROM STDIN").is_ok());
    }

    #[test]
    fn detects_select_and_with_as_limitable() {
        assert!(is_select_like("  select * from t"));
        assert!(is_select_like("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_select_like("UPDATE t SET a = 1"));
    }

    #[test]
    fn detects_an_explicit_limit_case_insensitively() {
        assert!(has_explicit_limit("SELECT * FROM t limit 10"));
        assert!(!has_explicit_limit("SELECT * FROM t"));
    }
}
