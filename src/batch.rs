//! Drives the strategy ladder over every input row, one row at a time.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;

use crate::{
    columns::{ColumnMapping, ConfigError},
    input::InputTable,
    model::{Field, MatchedRecord, ProviderQuery, RegistryRecord, SubjectKind},
    projector::{OutputRow, OutputTable, project},
    registry::RegistrySearch,
    strategy::StrategyLadder,
};

/// Where an NPI may not repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupScope {
    /// Once per input row; the same provider may match several rows.
    #[default]
    PerRow,
    /// Once per batch run; later rows never repeat an earlier NPI.
    Batch,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Keep a record only if some taxonomy description contains one of these.
    pub taxonomy_keywords: Vec<String>,
    /// Keep a record only if some location is in one of these states.
    pub state_filter: Vec<String>,
    pub dedup: DedupScope,
    /// Rows before this index were finished by an earlier run.
    pub start_row: usize,
}

/// Receives the completion fraction in `[0, 1]`.
pub trait ProgressSink {
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64)> ProgressSink for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Receives each finished row's output before the next row starts.
pub trait RowSink {
    fn row_finished(&mut self, row_index: usize, rows: &[OutputRow]) -> anyhow::Result<()>;
}

/// Keeps nothing; the rows are still returned in [`BatchOutcome::output`].
pub struct DiscardRows;

impl RowSink for DiscardRows {
    fn row_finished(&mut self, _row_index: usize, _rows: &[OutputRow]) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed saving results for row {row}: {error:#}")]
    Sink { row: usize, error: anyhow::Error },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row has neither a last name nor an institution name")]
    Unresolvable,
    #[error("row has {found} cells but the input has {expected} columns")]
    RaggedRow { expected: usize, found: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_rows: usize,
    pub rows_skipped: usize,
    pub rows_processed: usize,
    pub rows_matched: usize,
    pub rows_unmatched: usize,
    pub row_failures: usize,
    pub output_rows: usize,
    pub unique_npis: usize,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows in input:        {}", self.total_rows)?;
        if self.rows_skipped > 0 {
            writeln!(f, "Rows done earlier:    {}", self.rows_skipped)?;
        }
        writeln!(f, "Rows processed:       {}", self.rows_processed)?;
        writeln!(f, "Rows matched:         {}", self.rows_matched)?;
        writeln!(f, "Rows without match:   {}", self.rows_unmatched)?;
        writeln!(f, "Rows failed:          {}", self.row_failures)?;
        writeln!(f, "Output rows:          {}", self.output_rows)?;
        write!(f, "Unique NPIs:          {}", self.unique_npis)?;
        if self.interrupted {
            write!(f, "\nStopped before the last row")?;
        }
        Ok(())
    }
}

/// A row that produced no output, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedRow {
    /// 1-based, as a spreadsheet user would count.
    pub row_number: usize,
    pub label: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub kind: Option<SubjectKind>,
    pub output: OutputTable,
    pub summary: RunSummary,
    pub unmatched: Vec<UnmatchedRow>,
}

struct RowResult {
    rows: Vec<OutputRow>,
    miss_reason: Option<&'static str>,
}

pub struct BatchRunner<R> {
    ladder: StrategyLadder<R>,
    options: BatchOptions,
    emitted: HashSet<String>,
    stop: Arc<AtomicBool>,
}

impl<R: RegistrySearch> BatchRunner<R> {
    pub fn new(ladder: StrategyLadder<R>, options: BatchOptions) -> Self {
        Self {
            ladder,
            options,
            emitted: HashSet::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seeds batch-wide dedup with NPIs written by an earlier, interrupted run.
    pub fn with_emitted(mut self, npis: HashSet<String>) -> Self {
        self.emitted = npis;
        self
    }

    /// Checked between rows; once set, no further row starts.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn ladder(&self) -> &StrategyLadder<R> {
        &self.ladder
    }

    pub async fn run(
        &mut self,
        table: &InputTable,
        mapping: &ColumnMapping,
        progress: &mut dyn ProgressSink,
        sink: &mut dyn RowSink,
    ) -> Result<BatchOutcome, BatchError> {
        let kind = mapping.validate(&table.headers)?;
        let total = table.len();
        let start = self.options.start_row.min(total);
        tracing::info!(%kind, total, start, dedup = ?self.options.dedup, "starting batch");

        let mut outcome = BatchOutcome {
            kind: Some(kind),
            ..Default::default()
        };
        outcome.summary.total_rows = total;
        outcome.summary.rows_skipped = start;
        let mut unique = HashSet::new();

        for idx in start..total {
            progress.report(idx as f64 / total as f64);
            if self.stop.load(Ordering::SeqCst) {
                tracing::warn!(row = idx + 1, "stop requested; leaving remaining rows for resume");
                outcome.summary.interrupted = true;
                break;
            }

            let label = build_query(kind, mapping, table, idx)
                .map(|q| q.label())
                .unwrap_or_default();
            let result = self.process_row(kind, mapping, table, idx).await;
            outcome.summary.rows_processed += 1;

            let rows = match result {
                Ok(RowResult { rows, miss_reason }) => {
                    if let Some(reason) = miss_reason {
                        tracing::info!(row = idx + 1, provider = %label, reason, "no output for row");
                        outcome.summary.rows_unmatched += 1;
                        outcome.unmatched.push(UnmatchedRow {
                            row_number: idx + 1,
                            label,
                            reason: reason.to_string(),
                        });
                    } else {
                        outcome.summary.rows_matched += 1;
                    }
                    rows
                }
                Err(err) => {
                    tracing::warn!(row = idx + 1, error = %err, "row failed");
                    outcome.summary.row_failures += 1;
                    outcome.unmatched.push(UnmatchedRow {
                        row_number: idx + 1,
                        label,
                        reason: err.to_string(),
                    });
                    Vec::new()
                }
            };

            sink.row_finished(idx, &rows)
                .map_err(|error| BatchError::Sink { row: idx + 1, error })?;
            for row in rows {
                unique.insert(row.npi.clone());
                outcome.output.push(row);
            }
        }

        outcome.summary.output_rows = outcome.output.len();
        outcome.summary.unique_npis = unique.len();
        progress.report(1.0);
        tracing::info!(
            processed = outcome.summary.rows_processed,
            matched = outcome.summary.rows_matched,
            unmatched = outcome.summary.rows_unmatched,
            failures = outcome.summary.row_failures,
            output_rows = outcome.summary.output_rows,
            "batch finished"
        );
        Ok(outcome)
    }

    async fn process_row(
        &mut self,
        kind: SubjectKind,
        mapping: &ColumnMapping,
        table: &InputTable,
        idx: usize,
    ) -> Result<RowResult, RowError> {
        let query = build_query(kind, mapping, table, idx)?;
        if !query.is_resolvable() {
            return Err(RowError::Unresolvable);
        }

        let matches = self.ladder.resolve(kind, &query).await;
        if matches.is_empty() {
            return Ok(RowResult {
                rows: Vec::new(),
                miss_reason: Some("no verified registry match"),
            });
        }

        let filtered: Vec<MatchedRecord> = matches
            .into_iter()
            .filter(|m| passes_taxonomy_filter(&m.record, &self.options.taxonomy_keywords))
            .filter(|m| passes_state_filter(&m.record, &self.options.state_filter))
            .collect();
        if filtered.is_empty() {
            return Ok(RowResult {
                rows: Vec::new(),
                miss_reason: Some("all matches removed by filters"),
            });
        }

        let mut seen_this_row = HashSet::new();
        let mut rows = Vec::new();
        for matched in &filtered {
            let npi = &matched.record.number;
            if !seen_this_row.insert(npi.clone()) {
                continue;
            }
            if self.options.dedup == DedupScope::Batch && self.emitted.contains(npi) {
                continue;
            }
            if let Some(row) = project(kind, matched, &table.headers, &table.rows[idx]) {
                if self.options.dedup == DedupScope::Batch {
                    self.emitted.insert(npi.clone());
                }
                rows.push(row);
            }
        }

        let miss_reason = rows
            .is_empty()
            .then_some("matches already emitted or without any address");
        Ok(RowResult { rows, miss_reason })
    }
}

/// Builds the row's query from the mapped columns the subject kind uses.
pub fn build_query(
    kind: SubjectKind,
    mapping: &ColumnMapping,
    table: &InputTable,
    idx: usize,
) -> Result<ProviderQuery, RowError> {
    let row = &table.rows[idx];
    if row.len() != table.headers.len() {
        return Err(RowError::RaggedRow {
            expected: table.headers.len(),
            found: row.len(),
        });
    }
    let fields: &[Field] = match kind {
        SubjectKind::Institution => &[Field::InstitutionName, Field::State, Field::Zip],
        SubjectKind::Individual => &[
            Field::LastName,
            Field::FirstName,
            Field::City,
            Field::State,
            Field::Zip,
        ],
    };

    let mut query = ProviderQuery::default();
    for field in fields {
        let value = mapping
            .column(*field)
            .and_then(|column| table.column_index(column))
            .and_then(|col| row[col].clone());
        query.set(*field, value);
    }
    Ok(query)
}

pub fn passes_taxonomy_filter(record: &RegistryRecord, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    record.taxonomies.iter().any(|t| {
        let desc = t.desc.as_deref().unwrap_or("").to_lowercase();
        keywords.iter().any(|k| desc.contains(k.as_str()))
    })
}

pub fn passes_state_filter(record: &RegistryRecord, states: &[String]) -> bool {
    if states.is_empty() {
        return true;
    }
    record.all_locations().any(|(address, _)| {
        let state = address.state.as_deref().unwrap_or("").trim();
        states.iter().any(|s| s.trim().eq_ignore_ascii_case(state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{RegistryAddress, RegistryBasic, Taxonomy},
        registry::{RegistryParam, SearchParams},
    };
    use std::{cell::RefCell, time::Duration};

    struct FakeRegistry {
        responder: Box<dyn Fn(&SearchParams) -> Vec<RegistryRecord>>,
        calls: RefCell<usize>,
    }

    impl RegistrySearch for FakeRegistry {
        async fn query(&self, params: &SearchParams) -> Vec<RegistryRecord> {
            *self.calls.borrow_mut() += 1;
            (self.responder)(params)
        }
    }

    fn runner(
        options: BatchOptions,
        responder: impl Fn(&SearchParams) -> Vec<RegistryRecord> + 'static,
    ) -> BatchRunner<FakeRegistry> {
        let registry = FakeRegistry {
            responder: Box::new(responder),
            calls: RefCell::new(0),
        };
        BatchRunner::new(StrategyLadder::new(registry, Duration::ZERO), options)
    }

    fn record(npi: &str, last: &str, state: &str, taxonomy: &str) -> RegistryRecord {
        RegistryRecord {
            number: npi.to_string(),
            basic: RegistryBasic {
                first_name: Some("PAT".into()),
                last_name: Some(last.to_string()),
                organization_name: Some(format!("{last} CLINIC")),
                ..Default::default()
            },
            addresses: vec![RegistryAddress {
                city: Some("FRESNO".into()),
                state: Some(state.to_string()),
                ..Default::default()
            }],
            taxonomies: vec![Taxonomy {
                desc: Some(taxonomy.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn surname_table(rows: &[(&str, &str)]) -> (InputTable, ColumnMapping) {
        let table = InputTable::new(
            vec!["Last".into(), "State".into()],
            rows.iter()
                .map(|(last, state)| {
                    vec![
                        Some(last.to_string()).filter(|v| !v.is_empty()),
                        Some(state.to_string()).filter(|v| !v.is_empty()),
                    ]
                })
                .collect(),
        );
        let mut mapping = ColumnMapping::default();
        mapping.set(Field::LastName, "Last");
        mapping.set(Field::State, "State");
        (table, mapping)
    }

    #[tokio::test]
    async fn per_row_dedup_allows_repeat_across_rows() {
        let (table, mapping) = surname_table(&[("Smith", "CA"), ("Smith", "CA")]);
        let mut runner = runner(BatchOptions::default(), |_| {
            vec![record("1234567893", "SMITH", "CA", "Family Medicine")]
        });
        let mut fractions = Vec::new();
        let mut progress = |f: f64| fractions.push(f);

        let outcome = runner
            .run(&table, &mapping, &mut progress, &mut DiscardRows)
            .await
            .unwrap();

        assert_eq!(outcome.output.len(), 2);
        assert_eq!(outcome.summary.unique_npis, 1);
        assert_eq!(outcome.summary.rows_matched, 2);
        assert_eq!(fractions, vec![0.0, 0.5, 1.0]);
        assert_eq!(outcome.output.rows[0].get("input_Last"), Some("Smith"));
    }

    #[tokio::test]
    async fn batch_dedup_suppresses_repeat_across_rows() {
        let (table, mapping) = surname_table(&[("Smith", "CA"), ("Smith", "CA")]);
        let options = BatchOptions {
            dedup: DedupScope::Batch,
            ..Default::default()
        };
        let mut runner = runner(options, |_| {
            vec![record("1234567893", "SMITH", "CA", "Family Medicine")]
        });

        let outcome = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap();

        assert_eq!(outcome.output.len(), 1);
        assert_eq!(outcome.summary.rows_unmatched, 1);
        assert_eq!(outcome.unmatched[0].row_number, 2);
    }

    #[tokio::test]
    async fn resumed_batch_dedup_honours_earlier_npis() {
        let (table, mapping) = surname_table(&[("Smith", "CA"), ("Jones", "CA")]);
        let options = BatchOptions {
            dedup: DedupScope::Batch,
            start_row: 1,
            ..Default::default()
        };
        let mut runner = runner(options, |params| {
            if params.get(RegistryParam::LastName) == Some("Jones") {
                vec![
                    record("1234567893", "JONES", "CA", "Nurse Practitioner"),
                    record("1555555550", "JONES", "CA", "Nurse Practitioner"),
                ]
            } else {
                Vec::new()
            }
        })
        .with_emitted(HashSet::from(["1234567893".to_string()]));

        let outcome = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap();

        assert_eq!(outcome.summary.rows_skipped, 1);
        assert_eq!(outcome.summary.rows_processed, 1);
        let npis: Vec<&str> = outcome.output.rows.iter().map(|r| r.npi.as_str()).collect();
        assert_eq!(npis, vec!["1555555550"]);
    }

    #[tokio::test]
    async fn filters_apply_before_projection() {
        let (table, mapping) = surname_table(&[("Smith", "")]);
        let options = BatchOptions {
            taxonomy_keywords: vec!["PEDIATRIC".into()],
            state_filter: vec!["ca".into()],
            ..Default::default()
        };
        let mut runner = runner(options, |_| {
            vec![
                record("1000000001", "SMITH", "CA", "Pediatrics, Pediatric Cardiology"),
                record("1000000002", "SMITH", "NV", "Pediatric Nurse"),
                record("1000000003", "SMITH", "CA", "Dentist"),
            ]
        });

        let outcome = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap();

        let npis: Vec<&str> = outcome.output.rows.iter().map(|r| r.npi.as_str()).collect();
        assert_eq!(npis, vec!["1000000001"]);
    }

    #[tokio::test]
    async fn bad_rows_are_logged_and_skipped() {
        let (mut table, mapping) = surname_table(&[("", "CA"), ("Smith", "CA"), ("Smith", "CA")]);
        table.rows[2].pop();
        let mut runner = runner(BatchOptions::default(), |_| {
            vec![record("1234567893", "SMITH", "CA", "Family Medicine")]
        });

        let outcome = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap();

        assert_eq!(outcome.summary.row_failures, 2);
        assert_eq!(outcome.summary.rows_matched, 1);
        assert_eq!(outcome.output.len(), 1);
        assert_eq!(outcome.unmatched[0].reason, RowError::Unresolvable.to_string());
        assert_eq!(outcome.unmatched[1].row_number, 3);
        assert_eq!(*runner.ladder().registry().calls.borrow(), 1);
    }

    #[tokio::test]
    async fn config_error_stops_before_any_row() {
        let table = InputTable::new(
            vec!["City".into(), "Zip".into()],
            vec![vec![Some("Fresno".into()), Some("93701".into())]],
        );
        let mut mapping = ColumnMapping::default();
        mapping.set(Field::City, "City");
        let mut runner = runner(BatchOptions::default(), |_| Vec::new());

        let err = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Config(ConfigError::NoIdentityColumns)));
        assert_eq!(*runner.ladder().registry().calls.borrow(), 0);
    }

    #[tokio::test]
    async fn stop_flag_interrupts_between_rows() {
        let (table, mapping) = surname_table(&[("Smith", "CA"), ("Smith", "CA")]);
        let stop = Arc::new(AtomicBool::new(true));
        let mut runner = runner(BatchOptions::default(), |_| Vec::new()).with_stop_flag(stop);

        let outcome = runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut DiscardRows)
            .await
            .unwrap();

        assert!(outcome.summary.interrupted);
        assert_eq!(outcome.summary.rows_processed, 0);
    }

    #[tokio::test]
    async fn sink_sees_every_processed_row() {
        struct Recorder(Vec<(usize, usize)>);
        impl RowSink for Recorder {
            fn row_finished(&mut self, row_index: usize, rows: &[OutputRow]) -> anyhow::Result<()> {
                self.0.push((row_index, rows.len()));
                Ok(())
            }
        }

        let (table, mapping) = surname_table(&[("Smith", "CA"), ("Nobody", "CA")]);
        let mut runner = runner(BatchOptions::default(), |params| {
            if params.get(RegistryParam::LastName) == Some("Smith") {
                vec![record("1234567893", "SMITH", "CA", "Family Medicine")]
            } else {
                Vec::new()
            }
        });
        let mut recorder = Recorder(Vec::new());

        runner
            .run(&table, &mapping, &mut |_: f64| {}, &mut recorder)
            .await
            .unwrap();

        assert_eq!(recorder.0, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn summary_renders_counts_without_cli_hints() {
        let summary = RunSummary {
            total_rows: 10,
            rows_skipped: 4,
            rows_processed: 3,
            rows_matched: 2,
            rows_unmatched: 1,
            output_rows: 5,
            unique_npis: 4,
            interrupted: true,
            ..Default::default()
        };
        let text = summary.to_string();

        assert!(text.contains("Rows done earlier:    4"));
        assert!(text.contains("Output rows:          5"));
        assert!(text.ends_with("Stopped before the last row"));
        assert!(!text.contains("--"));
    }

    #[test]
    fn query_uses_only_fields_for_the_kind() {
        let table = InputTable::new(
            vec!["Org".into(), "Last".into(), "ST".into()],
            vec![vec![Some("Mercy General".into()), Some("Smith".into()), Some("CA".into())]],
        );
        let mut mapping = ColumnMapping::default();
        mapping.set(Field::InstitutionName, "Org");
        mapping.set(Field::LastName, "Last");
        mapping.set(Field::State, "ST");

        let query = build_query(SubjectKind::Institution, &mapping, &table, 0).unwrap();
        assert_eq!(query.institution_name.as_deref(), Some("Mercy General"));
        assert_eq!(query.last_name, None);
        assert_eq!(query.state.as_deref(), Some("CA"));
    }
}
