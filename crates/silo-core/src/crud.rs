//! REST query-string → parameterized SQL compiler.
//!
//! Takes a table name and a query-string shaped like PostgREST's filter
//! grammar and compiles it into a bound statement against a cached,
//! per-project schema. No client-supplied value is ever interpolated into
//! the SQL text — every value becomes a positional bind parameter, and
//! every identifier (table, column) is checked against the schema cache
//! before being quoted in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use tokio::sync::RwLock;
use uuid::Uuid;

const SCHEMA_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_LIMIT: i64 = 100;
const MAX_INSERT_ROWS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    #[error("invalid table name: {0}")]
    InvalidTable(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("unsupported filter operator: {0}")]
    UnsupportedOperator(String),

    #[error("limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { max: i64, got: i64 },

    #[error("update and delete require at least one filter")]
    UnscopedMutation,

    #[error("insert accepts between 1 and {max} rows")]
    InsertRowCountOutOfRange { max: usize },

    #[error("insert row is missing required structure: {0}")]
    MalformedRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A single REST operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOp {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    Ilike,
    In,
}

impl FilterOp {
    fn parse(s: &str) -> Result<Self, CrudError> {
        match s {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "like" => Ok(Self::Like),
            "ilike" => Ok(Self::Ilike),
            "in" => Ok(Self::In),
            other => Err(CrudError::UnsupportedOperator(other.to_owned())),
        }
    }

    fn sql_operator(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::Ilike => "ILIKE",
            Self::In => "IN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

/// A parsed query string, prior to schema validation.
#[derive(Debug, Clone, Default)]
pub struct CrudQuery {
    pub select: Vec<String>,
    pub order: Option<Sort>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub filters: Vec<Filter>,
}

impl CrudQuery {
    /// Parse `query.param=value&...` pairs per the grammar.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::UnsupportedOperator`] for a key whose prefix
    /// isn't a recognized filter operator and isn't one of
    /// `select`/`order`/`limit`/`offset`.
    pub fn parse(pairs: &[(String, String)]) -> Result<Self, CrudError> {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "select" => {
                    query.select = if value == "*" {
                        Vec::new()
                    } else {
                        value.split(',').map(str::to_owned).collect()
                    };
                }
                "order" => {
                    let (col, dir) = value
                        .split_once('.')
                        .ok_or_else(|| CrudError::UnsupportedOperator(format!("order={value}")))?;
                    let direction = match dir {
                        "asc" => SortDirection::Asc,
                        "desc" => SortDirection::Desc,
                        other => {
                            return Err(CrudError::UnsupportedOperator(format!("order.{other}")))
                        }
                    };
                    query.order = Some(Sort {
                        column: col.to_owned(),
                        direction,
                    });
                }
                "limit" => {
                    query.limit = value.parse::<i64>().ok();
                }
                "offset" => {
                    query.offset = value.parse::<i64>().ok();
                }
                other => {
                    let (op, column) = other
                        .split_once('.')
                        .ok_or_else(|| CrudError::UnsupportedOperator(other.to_owned()))?;
                    let op = FilterOp::parse(op)?;
                    query.filters.push(Filter {
                        column: column.to_owned(),
                        op,
                        value: value.clone(),
                    });
                }
            }
        }
        Ok(query)
    }
}

/// Cached `information_schema` view for one project, refreshed on a 60s TTL.
#[derive(Debug, Clone, Default)]
struct ProjectSchema {
    tables: HashMap<String, Vec<String>>,
    fetched_at: Option<Instant>,
}

impl ProjectSchema {
    fn is_stale(&self) -> bool {
        match self.fetched_at {
            None => true,
            Some(t) => t.elapsed() > SCHEMA_CACHE_TTL,
        }
    }
}

/// Per-project `information_schema` cache, shared across CRUD calls.
#[derive(Default)]
pub struct SchemaCache {
    projects: RwLock<HashMap<Uuid, ProjectSchema>>,
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn columns_for(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
    ) -> Result<Vec<String>, CrudError> {
        {
            let cache = self.projects.read().await;
            if let Some(schema) = cache.get(&project_id) {
                if !schema.is_stale() {
                    return schema
                        .tables
                        .get(table)
                        .cloned()
                        .ok_or_else(|| CrudError::UnknownTable(table.to_owned()));
                }
            }
        }
        self.refresh(project_id, app_pool).await?;
        let cache = self.projects.read().await;
        cache
            .get(&project_id)
            .and_then(|schema| schema.tables.get(table).cloned())
            .ok_or_else(|| CrudError::UnknownTable(table.to_owned()))
    }

    /// List every table visible to a project along with its columns,
    /// always refreshing from `information_schema` first so a table just
    /// created by an admin SQL statement shows up immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::Database`] if the introspection query fails.
    pub async fn list_tables(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
    ) -> Result<HashMap<String, Vec<String>>, CrudError> {
        self.refresh(project_id, app_pool).await?;
        let cache = self.projects.read().await;
        Ok(cache
            .get(&project_id)
            .map(|schema| schema.tables.clone())
            .unwrap_or_default())
    }

    async fn refresh(&self, project_id: Uuid, app_pool: &PgPool) -> Result<(), CrudError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT table_name, column_name FROM information_schema.columns
             WHERE table_schema = 'public' ORDER BY table_name, ordinal_position",
        )
        .fetch_all(app_pool)
        .await?;

        let mut tables: HashMap<String, Vec<String>> = HashMap::new();
        for (table_name, column_name) in rows {
            tables.entry(table_name).or_default().push(column_name);
        }
        self.projects.write().await.insert(
            project_id,
            ProjectSchema {
                tables,
                fetched_at: Some(Instant::now()),
            },
        );
        Ok(())
    }
}

/// A compiled row returned by `select`, as `{column: text-rendered value}`.
/// The CRUD surface returns JSON, so every scalar is rendered through
/// `serde_json::Value` rather than a fixed Rust type.
pub type CrudRow = serde_json::Map<String, serde_json::Value>;

pub struct CrudCompiler {
    schema: Arc<SchemaCache>,
}

impl CrudCompiler {
    #[must_use]
    pub fn new(schema: Arc<SchemaCache>) -> Self {
        Self { schema }
    }

    fn validate_table(table: &str) -> Result<(), CrudError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
            && table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(())
        } else {
            Err(CrudError::InvalidTable(table.to_owned()))
        }
    }

    async fn allowed_columns(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
    ) -> Result<Vec<String>, CrudError> {
        self.schema.columns_for(project_id, app_pool, table).await
    }

    fn check_column(table: &str, allowed: &[String], column: &str) -> Result<(), CrudError> {
        if allowed.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(CrudError::UnknownColumn {
                table: table.to_owned(),
                column: column.to_owned(),
            })
        }
    }

    /// Compile and execute a `SELECT`.
    ///
    /// `max_rows_per_query` is the current row cap — callers pass in a fresh
    /// snapshot of the runtime-mutable setting on every call rather than one
    /// baked in at construction, so an admin changing the cap takes effect
    /// on the very next request.
    ///
    /// # Errors
    ///
    /// Returns a [`CrudError`] if the table/columns are invalid, the limit
    /// is out of range, or the underlying query fails.
    pub async fn select(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
        query: &CrudQuery,
        max_rows_per_query: i64,
    ) -> Result<Vec<CrudRow>, CrudError> {
        Self::validate_table(table)?;
        let allowed = self.allowed_columns(project_id, app_pool, table).await?;

        let select_list: Vec<String> = if query.select.is_empty() {
            allowed.clone()
        } else {
            for col in &query.select {
                Self::check_column(table, &allowed, col)?;
            }
            query.select.clone()
        };

        let mut sql = format!(
            "SELECT {} FROM \"{table}\"",
            select_list
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut binds: Vec<String> = Vec::new();
        Self::append_where(&mut sql, &mut binds, table, &allowed, &query.filters)?;

        if let Some(sort) = &query.order {
            Self::check_column(table, &allowed, &sort.column)?;
            let dir = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY \"{}\" {dir}", sort.column));
        }

        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=max_rows_per_query).contains(&limit) {
            return Err(CrudError::LimitOutOfRange {
                max: max_rows_per_query,
                got: limit,
            });
        }
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {}", offset.max(0)));
        }

        let mut built = sqlx::query(&sql);
        for value in &binds {
            built = built.bind(value.clone());
        }
        let rows = built.fetch_all(app_pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    /// Compile and execute an `UPDATE`. Requires at least one filter.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::UnscopedMutation`] if `query.filters` is empty,
    /// or any of the validation errors [`CrudCompiler::select`] can return.
    pub async fn update(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
        query: &CrudQuery,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<u64, CrudError> {
        Self::validate_table(table)?;
        if query.filters.is_empty() {
            return Err(CrudError::UnscopedMutation);
        }
        let allowed = self.allowed_columns(project_id, app_pool, table).await?;
        for col in body.keys() {
            Self::check_column(table, &allowed, col)?;
        }

        let mut binds: Vec<String> = Vec::new();
        let set_clause: Vec<String> = body
            .iter()
            .map(|(col, value)| {
                binds.push(json_value_to_text(value));
                format!("\"{col}\" = ${}", binds.len())
            })
            .collect();
        let mut sql = format!("UPDATE \"{table}\" SET {}", set_clause.join(", "));
        Self::append_where(&mut sql, &mut binds, table, &allowed, &query.filters)?;

        let mut built = sqlx::query(&sql);
        for value in &binds {
            built = built.bind(value.clone());
        }
        let result = built.execute(app_pool).await?;
        Ok(result.rows_affected())
    }

    /// Compile and execute a `DELETE`. Requires at least one filter.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::UnscopedMutation`] if `query.filters` is empty.
    pub async fn delete(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
        query: &CrudQuery,
    ) -> Result<u64, CrudError> {
        Self::validate_table(table)?;
        if query.filters.is_empty() {
            return Err(CrudError::UnscopedMutation);
        }
        let allowed = self.allowed_columns(project_id, app_pool, table).await?;
        let mut binds: Vec<String> = Vec::new();
        let mut sql = format!("DELETE FROM \"{table}\"");
        Self::append_where(&mut sql, &mut binds, table, &allowed, &query.filters)?;

        let mut built = sqlx::query(&sql);
        for value in &binds {
            built = built.bind(value.clone());
        }
        let result = built.execute(app_pool).await?;
        Ok(result.rows_affected())
    }

    /// Insert 1–1000 rows. Each row is validated and executed individually
    /// ("all-or-none per row, best-effort across rows") and the returned
    /// vector has one entry per input row: `Some(row)` on success.
    ///
    /// # Errors
    ///
    /// Returns [`CrudError::InsertRowCountOutOfRange`] if `rows` is empty or
    /// exceeds 1000; per-row failures are reported in the returned vector
    /// rather than aborting the whole call.
    pub async fn insert(
        &self,
        project_id: Uuid,
        app_pool: &PgPool,
        table: &str,
        rows: &[serde_json::Map<String, serde_json::Value>],
    ) -> Result<Vec<Result<CrudRow, CrudError>>, CrudError> {
        Self::validate_table(table)?;
        if rows.is_empty() || rows.len() > MAX_INSERT_ROWS {
            return Err(CrudError::InsertRowCountOutOfRange {
                max: MAX_INSERT_ROWS,
            });
        }
        let allowed = self.allowed_columns(project_id, app_pool, table).await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(self.insert_one(app_pool, table, &allowed, row).await);
        }
        Ok(results)
    }

    async fn insert_one(
        &self,
        app_pool: &PgPool,
        table: &str,
        allowed: &[String],
        row: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CrudRow, CrudError> {
        for col in row.keys() {
            Self::check_column(table, allowed, col)?;
        }
        let columns: Vec<&String> = row.keys().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
        let sql = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({}) RETURNING *",
            columns
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", ")
        );
        let mut built = sqlx::query(&sql);
        for col in &columns {
            built = built.bind(json_value_to_text(&row[*col]));
        }
        let inserted = built.fetch_one(app_pool).await?;
        Ok(row_to_json(&inserted))
    }

    fn append_where(
        sql: &mut String,
        binds: &mut Vec<String>,
        table: &str,
        allowed: &[String],
        filters: &[Filter],
    ) -> Result<(), CrudError> {
        if filters.is_empty() {
            return Ok(());
        }
        sql.push_str(" WHERE ");
        let mut clauses = Vec::with_capacity(filters.len());
        for filter in filters {
            Self::check_column(table, allowed, &filter.column)?;
            if filter.op == FilterOp::In {
                let values: Vec<&str> = filter.value.split(',').collect();
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        binds.push((*v).to_owned());
                        format!("${}", binds.len())
                    })
                    .collect();
                clauses.push(format!("\"{}\" IN ({})", filter.column, placeholders.join(", ")));
            } else {
                binds.push(filter.value.clone());
                clauses.push(format!(
                    "\"{}\" {} ${}",
                    filter.column,
                    filter.op.sql_operator(),
                    binds.len()
                ));
            }
        }
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }
}

fn json_value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn row_to_json(row: &PgRow) -> CrudRow {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = decode_cell(row, i, type_name);
        map.insert(column.name().to_owned(), value);
    }
    map
}

fn decode_cell(row: &PgRow, i: usize, type_name: &str) -> serde_json::Value {
    match type_name {
        "INT4" | "INT8" | "INT2" => row
            .try_get::<i64, _>(i)
            .map(serde_json::Value::from)
            .unwrap_or(serde_json::Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(i)
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
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_table_enforces_snake_case_identifier() {
        assert!(CrudCompiler::validate_table("users").is_ok());
        assert!(CrudCompiler::validate_table("_private").is_ok());
        assert!(CrudCompiler::validate_table("Users").is_err());
        assert!(CrudCompiler::validate_table("1users").is_err());
        assert!(CrudCompiler::validate_table("users; drop table x").is_err());
    }

    #[test]
    fn parse_grammar_recognizes_filters_order_and_paging() {
        let pairs = vec![
            ("select".to_owned(), "id,name".to_owned()),
            ("order".to_owned(), "id.desc".to_owned()),
            ("limit".to_owned(), "25".to_owned()),
            ("offset".to_owned(), "10".to_owned()),
            ("eq.status".to_owned(), "active".to_owned()),
            ("in.id".to_owned(), "1,2,3".to_owned()),
        ];
        let query = CrudQuery::parse(&pairs).unwrap();
        assert_eq!(query.select, vec!["id", "name"]);
        assert_eq!(query.limit, Some(25));
        assert_eq!(query.offset, Some(10));
        assert_eq!(query.filters.len(), 2);
        assert!(query
            .filters
            .iter()
            .any(|f| f.column == "id" && f.op == FilterOp::In));
        assert_eq!(query.order.unwrap().direction, SortDirection::Desc);
    }

    #[test]
    fn select_star_is_an_empty_select_list() {
        let pairs = vec![("select".to_owned(), "*".to_owned())];
        let query = CrudQuery::parse(&pairs).unwrap();
        assert!(query.select.is_empty());
    }

    #[test]
    fn unknown_operator_prefix_is_rejected() {
        let pairs = vec![("bogus.col".to_owned(), "1".to_owned())];
        assert!(CrudQuery::parse(&pairs).is_err());
    }

    #[test]
    fn append_where_builds_and_of_all_filters_with_positional_binds() {
        let allowed = vec!["id".to_owned(), "status".to_owned()];
        let filters = vec![
            Filter {
                column: "status".to_owned(),
                op: FilterOp::Eq,
                value: "active".to_owned(),
            },
            Filter {
                column: "id".to_owned(),
                op: FilterOp::In,
                value: "1,2,3".to_owned(),
            },
        ];
        let mut sql = String::new();
        let mut binds = Vec::new();
        CrudCompiler::append_where(&mut sql, &mut binds, "t", &allowed, &filters).unwrap();
        assert_eq!(sql, " WHERE \"status\" = $1 AND \"id\" IN ($2, $3, $4)");
        assert_eq!(binds, vec!["active", "1", "2", "3"]);
    }
}
