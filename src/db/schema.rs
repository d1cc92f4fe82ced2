use anyhow::{Context, Result};

use super::pool::Pool;

/// SQL data type of a destination column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Text,
    Varchar,
    Char,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Interval,
    Uuid,
    Bytea,
    /// Any other catalog type (jsonb, enums, arrays, domains, inet, ...)
    Other,
}

impl SqlType {
    /// Returns the Postgres type name; `Other` is only named by the catalog
    pub fn to_postgres(&self) -> Option<&'static str> {
        let name = match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Numeric => "NUMERIC",
            SqlType::Text => "TEXT",
            SqlType::Varchar => "VARCHAR",
            SqlType::Char => "CHAR",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMP WITH TIME ZONE",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Interval => "INTERVAL",
            SqlType::Uuid => "UUID",
            SqlType::Bytea => "BYTEA",
            SqlType::Other => return None,
        };
        Some(name)
    }

    /// Map a catalog type name (`information_schema.columns.data_type`, or a
    /// SQLite declared type) onto a SqlType. A missing SQLite type is TEXT;
    /// anything unrecognised is `Other`.
    pub fn from_catalog_name(data_type: &str) -> Self {
        let upper = data_type.trim().to_uppercase();
        // Strip modifiers such as VARCHAR(45) or NUMERIC(10,2)
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "SMALLINT" | "INT2" => SqlType::SmallInt,
            "INTEGER" | "INT" | "INT4" => SqlType::Integer,
            "BIGINT" | "INT8" => SqlType::BigInt,
            "REAL" | "FLOAT4" => SqlType::Real,
            "DOUBLE PRECISION" | "FLOAT8" => SqlType::DoublePrecision,
            "NUMERIC" | "DECIMAL" => SqlType::Numeric,
            "CHARACTER VARYING" | "VARCHAR" => SqlType::Varchar,
            "CHARACTER" | "CHAR" | "BPCHAR" => SqlType::Char,
            "TEXT" => SqlType::Text,
            "DATE" => SqlType::Date,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => SqlType::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => SqlType::TimestampTz,
            "TIME" | "TIME WITHOUT TIME ZONE" => SqlType::Time,
            "INTERVAL" => SqlType::Interval,
            "UUID" => SqlType::Uuid,
            "BYTEA" => SqlType::Bytea,
            "" => SqlType::Text,
            _ => SqlType::Other,
        }
    }

    pub fn category(&self) -> TypeCategory {
        match self {
            SqlType::Boolean
            | SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::DoublePrecision => TypeCategory::NativeNumeric,
            SqlType::Uuid => TypeCategory::NativeParsed,
            SqlType::Numeric
            | SqlType::Timestamp
            | SqlType::TimestampTz
            | SqlType::Date
            | SqlType::Time
            | SqlType::Interval
            | SqlType::Bytea
            | SqlType::Other => TypeCategory::StringCast,
            SqlType::Text | SqlType::Varchar | SqlType::Char => TypeCategory::DirectString,
        }
    }
}

/// Type category for SQL type conversion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    /// Parsed to Rust numeric types (i16, i32, i64, f32, f64, bool)
    NativeNumeric,
    /// Parsed to native Rust types (UUID)
    NativeParsed,
    /// Bound as text and wrapped in CAST(); the server parses the literal
    StringCast,
    /// Text types with direct string binding (TEXT, VARCHAR, CHAR)
    DirectString,
}

/// A column of an existing table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    /// Type name usable in `CAST(... AS type_name)`
    pub type_name: String,
    pub nullable: bool,
}

/// Columns of an existing table in ordinal order
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Find a column by exact name, falling back to a case-insensitive match
    pub fn find(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

/// Query the schema of an existing table from the database
pub async fn query_table_schema(pool: &Pool, table_name: &str) -> Result<TableSchema> {
    let rows = pool
        .table_columns(table_name)
        .await
        .context("Failed to query table schema")?;

    if rows.is_empty() {
        anyhow::bail!("Table '{}' not found or has no columns", table_name);
    }

    let columns = rows
        .into_iter()
        .map(|(name, data_type, udt_name, is_nullable)| {
            let sql_type = SqlType::from_catalog_name(&data_type);
            Column {
                name,
                sql_type,
                type_name: cast_type_name(sql_type, &udt_name),
                nullable: is_nullable.eq_ignore_ascii_case("YES"),
            }
        })
        .collect();

    Ok(TableSchema { columns })
}

/// Known types use their canonical name; everything else uses the catalog's
/// (possibly schema-qualified) type name, e.g. `jsonb`, `_int4`, `public.mood`
pub fn cast_type_name(sql_type: SqlType, udt_name: &str) -> String {
    match sql_type.to_postgres() {
        Some(name) => name.to_string(),
        None => udt_name.to_string(),
    }
}
