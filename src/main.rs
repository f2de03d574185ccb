mod args;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use args::Args;
use npi_resolver::{
    batch::{BatchOptions, BatchRunner, DedupScope, ProgressSink},
    checkpoint::{Checkpoint, input_fingerprint},
    columns::{ColumnSynonyms, auto_detect_columns},
    common::{default_output_path, delete_if_exists, install_ctrlc_handler, sibling_path},
    constants::{NPPES_API_DOC_URL, NPPES_RATE_LIMIT_NOTICE_URL},
    input::load_input_table,
    output::{CsvRowSink, write_unmatched_log},
    projector::output_headers,
    registry::{RegistryClient, RegistryConfig},
    strategy::StrategyLadder,
};

struct BarProgress {
    bar: ProgressBar,
    total: u64,
}

impl ProgressSink for BarProgress {
    fn report(&mut self, fraction: f64) {
        self.bar
            .set_position((fraction * self.total as f64).round() as u64);
    }
}

fn apply_row_progress_style(progress: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) eta {eta_precise} {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
}

fn delete_checkpoint(path: &Path) -> Result<()> {
    delete_if_exists(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        delete_if_exists(Path::new(&side))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    println!("NPI API references:");
    println!("  - {}", NPPES_RATE_LIMIT_NOTICE_URL);
    println!("  - {}", NPPES_API_DOC_URL);

    let table = load_input_table(&args.input)?;

    let mut synonyms = ColumnSynonyms::default();
    for (field, name) in &args.synonyms {
        synonyms.add(*field, name);
    }
    let mut mapping = auto_detect_columns(&table.headers, &synonyms);
    for (field, column) in &args.mappings {
        mapping.set(*field, column.clone());
    }
    println!("Column mapping:");
    for (field, column) in mapping.iter() {
        println!("  - {field} <- {column}");
    }
    let kind = mapping
        .validate(&table.headers)
        .context("Column mapping is not usable; adjust it with --map FIELD=COLUMN")?;
    println!("Resolving {} rows as {kind}s", table.len());

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    let unmatched_path = sibling_path(&output_path, "unmatched", "csv");
    let checkpoint_path = args
        .checkpoint_db
        .clone()
        .unwrap_or_else(|| sibling_path(&output_path, "checkpoint", "sqlite"));

    let checkpoint = Checkpoint::open(&checkpoint_path)?;
    let fingerprint = input_fingerprint(&args.input, &table);
    if !args.resume {
        checkpoint.reset()?;
    }
    let start_row = checkpoint.resume_from(&fingerprint)?;
    let appending = args.resume && start_row > 0;
    if appending {
        println!(
            "Resuming at row {} of {} from {}",
            start_row + 1,
            table.len(),
            checkpoint_path.display()
        );
    }

    let dedup = if args.batch_dedup {
        DedupScope::Batch
    } else {
        DedupScope::PerRow
    };
    let emitted = if appending && dedup == DedupScope::Batch {
        checkpoint.emitted_npis()?
    } else {
        HashSet::new()
    };

    let delay = Duration::from_millis(args.request_delay_ms);
    let client = RegistryClient::new(RegistryConfig {
        base_url: args.api_base_url.clone(),
        api_version: args.api_version.clone(),
        page_delay: delay,
        request_timeout: Duration::from_secs(args.timeout_secs),
    })?;
    let options = BatchOptions {
        taxonomy_keywords: args.taxonomy_keywords.clone(),
        state_filter: args.state_filter.clone(),
        dedup,
        start_row,
    };

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&stop));
    let mut runner = BatchRunner::new(StrategyLadder::new(client, delay), options)
        .with_emitted(emitted)
        .with_stop_flag(stop);

    let headers = output_headers(kind, &table.headers);
    let mut sink = CsvRowSink::create(&output_path, headers, appending, Some(&checkpoint))?;

    let total = table.len() as u64;
    let bar = ProgressBar::new(total);
    bar.set_prefix("Rows");
    apply_row_progress_style(&bar);
    bar.enable_steady_tick(Duration::from_millis(250));
    let mut progress = BarProgress { bar, total };

    let outcome = runner
        .run(&table, &mapping, &mut progress, &mut sink)
        .await?;
    progress.bar.finish_and_clear();
    let rows_written = sink.rows_written();
    drop(sink);

    write_unmatched_log(&outcome.unmatched, &unmatched_path, appending)?;

    println!("{}", outcome.summary);
    println!("Wrote {rows_written} rows to {}", output_path.display());
    if !outcome.unmatched.is_empty() {
        println!(
            "Logged {} rows without output to {}",
            outcome.unmatched.len(),
            unmatched_path.display()
        );
    }

    if outcome.summary.interrupted {
        println!(
            "Checkpoint kept at {}; rerun with --resume to continue.",
            checkpoint_path.display()
        );
    } else {
        drop(checkpoint);
        delete_checkpoint(&checkpoint_path)?;
    }
    Ok(())
}
