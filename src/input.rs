use anyhow::{Context, Result, bail};
use duckdb::Connection;
use std::path::Path;

use crate::common::{source_expr, sql_quote_ident};

/// The caller's roster as strings; `None` marks a NULL/empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl InputTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == column)
    }
}

/// Reads a `.csv` or `.parquet` file with every column cast to text.
pub fn load_input_table(input_path: &Path) -> Result<InputTable> {
    if !input_path.exists() {
        bail!("Input file not found at {}", input_path.display());
    }
    let conn = Connection::open_in_memory().context("Failed opening DuckDB")?;
    let source = source_expr(input_path)?;

    let mut describe = conn
        .prepare(&format!("DESCRIBE SELECT * FROM {source}"))
        .with_context(|| format!("Failed reading columns of {}", input_path.display()))?;
    let header_rows = describe
        .query_map([], |row| row.get::<usize, String>(0))
        .context("Failed running column query")?;
    let mut headers = Vec::new();
    for header in header_rows {
        headers.push(header.context("Failed reading column name")?);
    }
    if headers.is_empty() {
        bail!("Input file {} has no columns", input_path.display());
    }

    let select_list = headers
        .iter()
        .map(|h| format!("CAST({} AS VARCHAR)", sql_quote_ident(h)))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!("SELECT {select_list} FROM {source}");
    let mut stmt = conn
        .prepare(&query)
        .context("Failed preparing input row query")?;

    let width = headers.len();
    let row_iter = stmt
        .query_map([], |row| {
            (0..width)
                .map(|idx| row.get::<usize, Option<String>>(idx))
                .collect::<duckdb::Result<Vec<_>>>()
        })
        .context("Failed running input row query")?;

    let mut rows = Vec::new();
    for row in row_iter {
        let row = row.context("Failed reading input row")?;
        rows.push(
            row.into_iter()
                .map(|cell| cell.filter(|v| !v.trim().is_empty()))
                .collect(),
        );
    }

    tracing::info!(
        path = %input_path.display(),
        rows = rows.len(),
        columns = headers.len(),
        "loaded input table"
    );
    Ok(InputTable { headers, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_csv_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");
        fs::write(
            &path,
            "Last Name,First Name,Zip\nSmith,Jane,02134\nGonzález,,90210-1234\n",
        )
        .unwrap();

        let table = load_input_table(&path).unwrap();
        assert_eq!(table.headers, vec!["Last Name", "First Name", "Zip"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][2].as_deref(), Some("02134"));
        assert_eq!(table.rows[1][0].as_deref(), Some("González"));
        assert_eq!(table.rows[1][1], None);
        assert_eq!(table.column_index("Zip"), Some(2));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.txt");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(load_input_table(&path).is_err());
        assert!(load_input_table(&dir.path().join("missing.csv")).is_err());
    }
}
