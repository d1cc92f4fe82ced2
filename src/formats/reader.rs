use anyhow::{Result, bail};
use std::sync::Arc;

/// A single value read from a delimited file; empty fields are `None` (SQL NULL)
pub type Field = Option<String>;

/// A batch of rows from one partition file, bound to the dataset's column names
#[derive(Debug, Clone)]
pub struct RowChunk {
    /// 0-based position of this chunk within its file
    pub index: usize,
    pub columns: Arc<[String]>,
    /// Every row has exactly `columns.len()` fields
    pub rows: Vec<Vec<Field>>,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Configuration for delimited file reading (CSV, TSV, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedConfig {
    pub delimiter: u8,
    pub quote: u8,
}

impl DelimitedConfig {
    pub fn csv() -> Self {
        Self::default()
    }

    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            quote: b'"',
        }
    }

    /// Build from a user-supplied delimiter: a single ASCII character or `\t`
    pub fn with_delimiter(delimiter: &str) -> Result<Self> {
        let delimiter_byte = match delimiter {
            "\\t" | "\t" => return Ok(Self::tsv()),
            d if d.len() == 1 && d.is_ascii() => d.as_bytes()[0],
            _ => bail!("Delimiter must be a single ASCII character or \\t"),
        };

        if delimiter_byte == b'"' || delimiter_byte == b'\n' || delimiter_byte == b'\r' {
            bail!("Delimiter cannot be a quote or line break");
        }

        Ok(Self {
            delimiter: delimiter_byte,
            ..Self::default()
        })
    }
}

impl Default for DelimitedConfig {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
        }
    }
}
