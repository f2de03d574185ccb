use clap::Parser;
use std::path::PathBuf;

use npi_resolver::{
    constants::{
        DEFAULT_NPI_API_BASE_URL, DEFAULT_NPI_API_VERSION, DEFAULT_PAGE_DELAY_MS,
        DEFAULT_REQUEST_TIMEOUT_SECS,
    },
    model::Field,
};

#[derive(Debug, Parser)]
#[command(name = "npi_resolver")]
#[command(about = "Resolve a roster of providers to NPI Registry records")]
pub struct Args {
    /// Roster to resolve (.csv or .parquet).
    #[arg(long)]
    pub input: PathBuf,

    /// Output CSV path. Defaults to <input-stem>_npi.csv next to the input.
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Map a standard field to an input column, e.g. `last_name=Surname`.
    /// Fields: last_name, first_name, institution_name, city, state, zip.
    #[arg(long = "map", value_name = "FIELD=COLUMN", value_parser = parse_field_pair)]
    pub mappings: Vec<(Field, String)>,

    /// Extra header spelling to auto-detect for a field, e.g. `zip=mail code`.
    #[arg(long = "synonym", value_name = "FIELD=NAME", value_parser = parse_field_pair)]
    pub synonyms: Vec<(Field, String)>,

    /// Keep only records whose taxonomy description contains this keyword.
    #[arg(long = "taxonomy", value_name = "KEYWORD")]
    pub taxonomy_keywords: Vec<String>,

    /// Keep only records with a location in this state.
    #[arg(long = "state-filter", value_name = "STATE")]
    pub state_filter: Vec<String>,

    /// Never repeat an NPI across rows (default: once per row).
    #[arg(long, default_value_t = false)]
    pub batch_dedup: bool,

    /// Continue an interrupted run from its checkpoint, appending to the output.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// SQLite checkpoint path. Defaults to <output-stem>_checkpoint.sqlite.
    #[arg(long)]
    pub checkpoint_db: Option<PathBuf>,

    /// NPI Registry API base URL.
    ///
    /// NPPES reference:
    /// https://npiregistry.cms.hhs.gov/api-page
    #[arg(long, env = "NPI_API_BASE_URL", default_value = DEFAULT_NPI_API_BASE_URL)]
    pub api_base_url: String,

    /// NPI API version query parameter.
    #[arg(long, default_value = DEFAULT_NPI_API_VERSION)]
    pub api_version: String,

    /// Per-request timeout.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Pause between result pages and between strategies.
    #[arg(long, default_value_t = DEFAULT_PAGE_DELAY_MS)]
    pub request_delay_ms: u64,
}

fn parse_field_pair(raw: &str) -> Result<(Field, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    let field = Field::parse(field).ok_or_else(|| {
        let known: Vec<&str> = Field::ALL.iter().map(|f| f.as_str()).collect();
        format!("unknown field '{}'; expected one of {}", field.trim(), known.join(", "))
    })?;
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("missing value for {field}"));
    }
    Ok((field, value.to_string()))
}
