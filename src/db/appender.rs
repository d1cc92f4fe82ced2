use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use tracing::debug;

use super::pool::{Pool, PoolConnection};
use super::schema::{SqlType, TypeCategory, cast_type_name, query_table_schema};
use crate::config::QUERY_TIMEOUT;
use crate::formats::{Field, RowChunk};

type PgQuery<'q> = Query<'q, sqlx::Postgres, PgArguments>;

/// A destination column resolved against the live table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub sql_type: SqlType,
    /// Type named in `CAST($n AS ...)` for text-bound types
    pub type_name: String,
}

impl TargetColumn {
    /// A column of a type the loader models itself
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            type_name: cast_type_name(sql_type, "TEXT"),
        }
    }
}

/// Where and how the rows of one dataset are inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub table: String,
    /// In the same order as the dataset's CSV columns
    pub columns: Vec<TargetColumn>,
}

/// Destination for row chunks. Always appends; never creates, drops or truncates.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Resolve the destination columns of `table` for the given source column names
    async fn prepare(&self, table: &str, columns: &[String]) -> Result<InsertPlan>;

    /// Append every row of `chunk`, returning the number of rows written
    async fn append(&self, plan: &InsertPlan, chunk: &RowChunk) -> Result<u64>;
}

/// [`ChunkSink`] writing multi-row INSERT statements through the connection pool
#[derive(Debug, Clone)]
pub struct DbAppender {
    pool: Pool,
}

impl DbAppender {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkSink for DbAppender {
    async fn prepare(&self, table: &str, columns: &[String]) -> Result<InsertPlan> {
        let schema = query_table_schema(&self.pool, table)
            .await
            .with_context(|| format!("Destination table '{}' is not usable", table))?;

        let columns = columns
            .iter()
            .map(|name| {
                schema
                    .find(name)
                    .map(|col| {
                        debug!(
                            "{}.{} -> {}{}",
                            table,
                            col.name,
                            col.type_name,
                            if col.nullable { "" } else { " NOT NULL" }
                        );
                        TargetColumn {
                            name: col.name.clone(),
                            sql_type: col.sql_type,
                            type_name: col.type_name.clone(),
                        }
                    })
                    .ok_or_else(|| anyhow!("Table '{}' has no column '{}'", table, name))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InsertPlan {
            table: table.to_string(),
            columns,
        })
    }

    async fn append(&self, plan: &InsertPlan, chunk: &RowChunk) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }

        if chunk.columns.len() != plan.columns.len() {
            bail!(
                "Chunk has {} columns but the insert plan for '{}' has {}",
                chunk.columns.len(),
                plan.table,
                plan.columns.len()
            );
        }

        let rows_per_statement = rows_per_statement(plan.columns.len(), self.pool.max_bind_params());

        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection from pool")?;

        // One transaction per chunk: a chunk lands completely or not at all
        match &mut conn {
            PoolConnection::Postgres(pg_conn) => {
                let mut tx = sqlx::Connection::begin(&mut **pg_conn)
                    .await
                    .context("Failed to begin transaction")?;

                for (batch_idx, rows) in chunk.rows.chunks(rows_per_statement).enumerate() {
                    let insert_sql = build_insert_sql(plan, rows.len(), true);
                    let query = bind_rows(sqlx::query(&insert_sql), rows, &plan.columns)
                        .with_context(|| batch_context(plan, chunk, batch_idx, rows_per_statement))?;

                    tokio::time::timeout(QUERY_TIMEOUT, query.execute(&mut *tx))
                        .await
                        .map_err(|_| {
                            anyhow!(
                                "Query execution timed out after {} seconds",
                                QUERY_TIMEOUT.as_secs()
                            )
                        })?
                        .with_context(|| batch_context(plan, chunk, batch_idx, rows_per_statement))?;
                }

                tx.commit().await.context("Failed to commit chunk")?;
            }
            #[cfg(test)]
            PoolConnection::Sqlite(sqlite_conn) => {
                let mut tx = sqlx::Connection::begin(&mut **sqlite_conn)
                    .await
                    .context("Failed to begin transaction")?;

                for (batch_idx, rows) in chunk.rows.chunks(rows_per_statement).enumerate() {
                    let insert_sql =
                        convert_to_sqlite_placeholders(&build_insert_sql(plan, rows.len(), false));

                    // SQLite is dynamically typed: bind everything as text
                    let mut query = sqlx::query(&insert_sql);
                    for row in rows {
                        for value in row {
                            query = query.bind(value.as_deref());
                        }
                    }

                    query
                        .execute(&mut *tx)
                        .await
                        .with_context(|| batch_context(plan, chunk, batch_idx, rows_per_statement))?;
                }

                tx.commit().await.context("Failed to commit chunk")?;
            }
        }

        Ok(chunk.len() as u64)
    }
}

fn batch_context(plan: &InsertPlan, chunk: &RowChunk, batch_idx: usize, rows_per_statement: usize) -> String {
    let first_row = batch_idx * rows_per_statement;
    let sample = chunk
        .rows
        .get(first_row)
        .map(|row| record_preview(row))
        .unwrap_or_else(|| "<empty>".to_string());

    format!(
        "Failed to insert into '{}' (chunk {}, rows {}..{}, first record {})",
        plan.table,
        chunk.index,
        first_row,
        (first_row + rows_per_statement).min(chunk.len()),
        sample
    )
}

/// Short rendering of the first fields of a row for error messages
fn record_preview(row: &[Field]) -> String {
    let preview: Vec<String> = row
        .iter()
        .take(3)
        .map(|f| match f {
            None => "NULL".to_string(),
            Some(v) if v.chars().count() > 20 => {
                format!("{}...", v.chars().take(20).collect::<String>())
            }
            Some(v) => v.clone(),
        })
        .collect();

    format!(
        "[{}{}]",
        preview.join(", "),
        if row.len() > 3 { ", ..." } else { "" }
    )
}

/// Quote an SQL identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Rows that fit into one statement without exceeding the bind parameter limit
pub fn rows_per_statement(num_columns: usize, max_bind_params: usize) -> usize {
    (max_bind_params / num_columns.max(1)).max(1)
}

/// Build `INSERT INTO "t" ("a", "b") VALUES ($1, $2), ($3, $4), ...`
///
/// With `use_pg_cast`, parameters of types bound as text are wrapped in
/// `CAST(... AS type)` because PostgreSQL will not assign text to them implicitly.
/// Types the loader does not model are cast to the catalog's type name.
pub fn build_insert_sql(plan: &InsertPlan, row_count: usize, use_pg_cast: bool) -> String {
    let column_list: Vec<String> = plan.columns.iter().map(|c| quote_ident(&c.name)).collect();

    let mut value_groups = Vec::with_capacity(row_count);
    let mut param_idx = 1;

    for _ in 0..row_count {
        let placeholders: Vec<String> = plan
            .columns
            .iter()
            .map(|col| {
                let placeholder = format!("${}", param_idx);
                param_idx += 1;

                if use_pg_cast && col.sql_type.category() == TypeCategory::StringCast {
                    format!("CAST({} AS {})", placeholder, col.type_name)
                } else {
                    placeholder
                }
            })
            .collect();
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(&plan.table),
        column_list.join(", "),
        value_groups.join(", ")
    )
}

/// Convert Postgres-style placeholders ($1, $2, ...) to SQLite-style (?, ?, ...)
#[cfg(test)]
fn convert_to_sqlite_placeholders(sql: &str) -> String {
    let mut result = String::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            // Skip the dollar sign and any following digits
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            result.push('?');
        } else {
            result.push(ch);
        }
    }

    result
}

fn bind_rows<'q>(
    mut query: PgQuery<'q>,
    rows: &'q [Vec<Field>],
    columns: &[TargetColumn],
) -> Result<PgQuery<'q>> {
    for row in rows {
        for (value, column) in row.iter().zip(columns) {
            query = bind_typed_value(query, value.as_deref(), column)
                .with_context(|| format!("Column '{}'", column.name))?;
        }
    }
    Ok(query)
}

/// Bind a single value with proper type conversion
fn bind_typed_value<'q>(
    query: PgQuery<'q>,
    value: Option<&'q str>,
    column: &TargetColumn,
) -> Result<PgQuery<'q>> {
    let sql_type = column.sql_type;
    let Some(value) = value else {
        return Ok(bind_null(query, sql_type));
    };

    let category = sql_type.category();
    let trimmed = value.trim();

    // Whitespace-only is NULL for everything except text columns
    if trimmed.is_empty() && category != TypeCategory::DirectString {
        return Ok(bind_null(query, sql_type));
    }

    Ok(match sql_type {
        SqlType::Boolean => query.bind(parse_bool(trimmed)?),
        SqlType::SmallInt => query.bind(parse::<i16>(trimmed, &column.type_name)?),
        SqlType::Integer => query.bind(parse::<i32>(trimmed, &column.type_name)?),
        SqlType::BigInt => query.bind(parse::<i64>(trimmed, &column.type_name)?),
        SqlType::Real => query.bind(parse::<f32>(trimmed, &column.type_name)?),
        SqlType::DoublePrecision => query.bind(parse::<f64>(trimmed, &column.type_name)?),

        SqlType::Uuid => {
            let uuid = uuid::Uuid::parse_str(trimmed).with_context(|| {
                format!(
                    "Type mismatch: Cannot convert value to UUID.\n\
                     - Expected: UUID format (e.g., '550e8400-e29b-41d4-a716-446655440000')\n\
                     - Got: '{}'",
                    trimmed
                )
            })?;
            query.bind(uuid)
        }

        // CAST() in the statement converts these server-side
        _ if category == TypeCategory::StringCast => query.bind(trimmed),

        _ => query.bind(value),
    })
}

/// Bind NULL value for the appropriate type
fn bind_null(query: PgQuery<'_>, sql_type: SqlType) -> PgQuery<'_> {
    match sql_type {
        SqlType::Boolean => query.bind(None::<bool>),
        SqlType::SmallInt => query.bind(None::<i16>),
        SqlType::Integer => query.bind(None::<i32>),
        SqlType::BigInt => query.bind(None::<i64>),
        SqlType::Real => query.bind(None::<f32>),
        SqlType::DoublePrecision => query.bind(None::<f64>),
        SqlType::Uuid => query.bind(None::<uuid::Uuid>),
        _ => query.bind(None::<String>),
    }
}

/// Parse a value from string
fn parse<T: std::str::FromStr>(value: &str, type_name: &str) -> Result<T>
where
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        anyhow!(
            "Type mismatch: Cannot convert value to {}.\n\
             - Expected: Valid {} value\n\
             - Got: '{}'\n\
             - Error: {}",
            type_name,
            type_name,
            value,
            e
        )
    })
}

/// Parse boolean value
fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Ok(true),
        "false" | "f" | "0" | "no" | "n" => Ok(false),
        _ => Err(anyhow!(
            "Type mismatch: Cannot convert '{}' to BOOLEAN",
            value
        )),
    }
}
