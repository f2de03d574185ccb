use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::{collections::HashSet, path::Path};

use crate::{common::ensure_parent_dir, input::InputTable};

/// Resume state for one batch: the last finished row and, in batch-wide dedup
/// mode, every NPI already written.
pub struct Checkpoint {
    conn: Connection,
}

impl Checkpoint {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)
            .with_context(|| format!("Failed opening checkpoint DB {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS run_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS emitted_npis (
                npi TEXT PRIMARY KEY,
                row_index INTEGER NOT NULL
            );
            ",
        )
        .context("Failed initializing checkpoint schema")?;
        Ok(Self { conn })
    }

    fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM run_state WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed reading checkpoint key {key}"))
    }

    fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "
                INSERT INTO run_state (key, value) VALUES (?1, ?2)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                ",
                params![key, value],
            )
            .with_context(|| format!("Failed writing checkpoint key {key}"))?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM run_state; DELETE FROM emitted_npis;")
            .context("Failed clearing checkpoint")
    }

    /// Returns the first row still to process. A checkpoint written for a
    /// different input is discarded.
    pub fn resume_from(&self, fingerprint: &str) -> Result<usize> {
        let stored = self.get_state("fingerprint")?;
        if stored.as_deref() != Some(fingerprint) {
            if stored.is_some() {
                tracing::warn!("checkpoint belongs to a different input; starting over");
            }
            self.reset()?;
            self.set_state("fingerprint", fingerprint)?;
            return Ok(0);
        }
        let last = self
            .get_state("last_processed_row")?
            .and_then(|v| v.parse::<usize>().ok());
        Ok(last.map(|row| row + 1).unwrap_or(0))
    }

    pub fn last_processed_row(&self) -> Result<Option<usize>> {
        Ok(self
            .get_state("last_processed_row")?
            .and_then(|v| v.parse::<usize>().ok()))
    }

    /// Marks `row_index` finished and records the NPIs it emitted, atomically.
    pub fn record_row(&self, row_index: usize, npis: &[&str]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed starting checkpoint transaction")?;
        for npi in npis {
            tx.execute(
                "INSERT OR IGNORE INTO emitted_npis (npi, row_index) VALUES (?1, ?2)",
                params![npi, row_index as i64],
            )
            .with_context(|| format!("Failed recording emitted NPI {npi}"))?;
        }
        tx.execute(
            "
            INSERT INTO run_state (key, value) VALUES ('last_processed_row', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
            [row_index.to_string()],
        )
        .context("Failed recording last processed row")?;
        tx.commit().context("Failed committing checkpoint")?;
        Ok(())
    }

    pub fn emitted_npis(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT npi FROM emitted_npis")
            .context("Failed preparing emitted NPI query")?;
        let rows = stmt
            .query_map([], |row| row.get::<usize, String>(0))
            .context("Failed querying emitted NPIs")?;
        let mut npis = HashSet::new();
        for npi in rows {
            npis.insert(npi.context("Failed reading emitted NPI")?);
        }
        Ok(npis)
    }
}

/// Identifies an input well enough to refuse resuming against another file.
pub fn input_fingerprint(input_path: &Path, table: &InputTable) -> String {
    format!(
        "{}|{}|{}",
        input_path.display(),
        table.len(),
        table.headers.join("\u{1f}")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: usize) -> InputTable {
        InputTable::new(
            vec!["last".into(), "state".into()],
            (0..rows).map(|_| vec![Some("Smith".into()), None]).collect(),
        )
    }

    #[test]
    fn resumes_after_last_recorded_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/checkpoint.sqlite");
        let fingerprint = input_fingerprint(Path::new("roster.csv"), &table(5));

        {
            let checkpoint = Checkpoint::open(&path).unwrap();
            assert_eq!(checkpoint.resume_from(&fingerprint).unwrap(), 0);
            checkpoint.record_row(0, &["1234567893"]).unwrap();
            checkpoint.record_row(1, &[]).unwrap();
            checkpoint.record_row(2, &["1234567893", "1999999992"]).unwrap();
        }

        let checkpoint = Checkpoint::open(&path).unwrap();
        assert_eq!(checkpoint.resume_from(&fingerprint).unwrap(), 3);
        assert_eq!(checkpoint.last_processed_row().unwrap(), Some(2));
        let npis = checkpoint.emitted_npis().unwrap();
        assert_eq!(npis.len(), 2);
        assert!(npis.contains("1999999992"));
    }

    #[test]
    fn different_input_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = Checkpoint::open(&dir.path().join("checkpoint.sqlite")).unwrap();
        let first = input_fingerprint(Path::new("roster.csv"), &table(5));
        let second = input_fingerprint(Path::new("roster.csv"), &table(6));

        checkpoint.resume_from(&first).unwrap();
        checkpoint.record_row(3, &["1234567893"]).unwrap();

        assert_eq!(checkpoint.resume_from(&second).unwrap(), 0);
        assert!(checkpoint.emitted_npis().unwrap().is_empty());
        assert_eq!(checkpoint.last_processed_row().unwrap(), None);
    }
}
