use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashSet, fmt, time::Duration};
use thiserror::Error;
use tokio::time::sleep;

use crate::{
    common::truncate_for_log,
    constants::{
        DEFAULT_NPI_API_BASE_URL, DEFAULT_NPI_API_VERSION, DEFAULT_PAGE_DELAY_MS,
        DEFAULT_REQUEST_TIMEOUT_SECS, REGISTRY_PAGE_SIZE, US_STATE_CODES, USER_AGENT,
    },
    model::RegistryRecord,
    normalize::{normalize_text, normalize_zip},
};

/// Query keys the registry recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryParam {
    FirstName,
    LastName,
    OrganizationName,
    City,
    State,
    PostalCode,
    EnumerationType,
}

impl RegistryParam {
    pub fn as_str(self) -> &'static str {
        match self {
            RegistryParam::FirstName => "first_name",
            RegistryParam::LastName => "last_name",
            RegistryParam::OrganizationName => "organization_name",
            RegistryParam::City => "city",
            RegistryParam::State => "state",
            RegistryParam::PostalCode => "postal_code",
            RegistryParam::EnumerationType => "enumeration_type",
        }
    }
}

/// Normalized, ordered parameter set for one registry search. Empty values
/// are never stored; the registry treats an empty parameter differently from
/// an absent one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    entries: Vec<(RegistryParam, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: RegistryParam, value: Option<&str>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: RegistryParam, value: Option<&str>) {
        let value = match key {
            RegistryParam::PostalCode => normalize_zip(value),
            _ => normalize_text(value),
        };
        self.entries.retain(|(k, _)| *k != key);
        if !value.is_empty() {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: RegistryParam) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// False when a state + postal code pair cannot be a US address. Organization
    /// searches are exempt.
    pub fn passes_geography_guard(&self) -> bool {
        if self.get(RegistryParam::OrganizationName).is_some() {
            return true;
        }
        match (
            self.get(RegistryParam::State),
            self.get(RegistryParam::PostalCode),
        ) {
            (Some(state), Some(zip)) => is_us_address(state, zip),
            _ => true,
        }
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

pub fn is_us_address(state: &str, zip: &str) -> bool {
    let state = state.trim().to_ascii_uppercase();
    US_STATE_CODES.contains(&state.as_str()) && normalize_zip(Some(zip)).len() == 5
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("registry returned malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("registry response has no result_count ({detail})")]
    MissingResultCount { detail: String },
}

/// Anything that can answer a registry search. The HTTP client is the only
/// production implementation.
#[allow(async_fn_in_trait)]
pub trait RegistrySearch {
    /// Never fails: transport and decode problems come back as an empty (or
    /// truncated) list after being logged.
    async fn query(&self, params: &SearchParams) -> Vec<RegistryRecord>;
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: String,
    pub api_version: String,
    pub page_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_NPI_API_BASE_URL.to_string(),
            api_version: DEFAULT_NPI_API_VERSION.to_string(),
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryPage {
    result_count: Option<u64>,
    #[serde(default)]
    results: Option<Vec<Value>>,
    #[serde(default, rename = "Errors")]
    errors: Option<Value>,
}

/// One decoded page. `raw_len` counts every result the registry sent,
/// including ones that failed to decode.
struct FetchedPage {
    total: u64,
    raw_len: usize,
    records: Vec<RegistryRecord>,
}

pub struct RegistryClient {
    client: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .context("Failed creating HTTP client")?;
        Ok(Self { client, config })
    }

    async fn fetch_page(
        &self,
        params: &SearchParams,
        skip: usize,
    ) -> Result<FetchedPage, RegistryError> {
        let limit = REGISTRY_PAGE_SIZE.to_string();
        let skip = skip.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("version", self.config.api_version.as_str()),
            ("limit", limit.as_str()),
            ("skip", skip.as_str()),
        ];
        query.extend(params.iter());

        let resp = self
            .client
            .get(&self.config.base_url)
            .query(&query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status,
                body: truncate_for_log(&body),
            });
        }

        let body = resp.text().await?;
        let page: RegistryPage = serde_json::from_str(&body)?;
        let Some(total) = page.result_count else {
            let detail = page
                .errors
                .map(|e| truncate_for_log(&e.to_string()))
                .unwrap_or_else(|| "no Errors field".to_string());
            return Err(RegistryError::MissingResultCount { detail });
        };
        let raw = page.results.unwrap_or_default();
        let raw_len = raw.len();
        let mut records = Vec::with_capacity(raw_len);
        for value in raw {
            match serde_json::from_value::<RegistryRecord>(value) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(
                    params = %params,
                    skip = %skip,
                    error = %err,
                    "skipping malformed registry result"
                ),
            }
        }
        Ok(FetchedPage {
            total,
            raw_len,
            records,
        })
    }

    /// Pages through every result for `params`. A failure on the first page is
    /// returned; a failure on a later page truncates to what was collected.
    pub async fn fetch_all(
        &self,
        params: &SearchParams,
    ) -> Result<Vec<RegistryRecord>, RegistryError> {
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut skip = 0usize;

        loop {
            let FetchedPage {
                total,
                raw_len,
                records: page,
            } = match self.fetch_page(params, skip).await {
                Ok(page) => page,
                Err(err) if skip == 0 => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        params = %params,
                        skip,
                        error = %err,
                        "registry page failed; keeping {} records already fetched",
                        records.len()
                    );
                    break;
                }
            };
            if total == 0 {
                break;
            }

            let mut added = 0usize;
            for record in page {
                if seen.insert(record.number.clone()) {
                    records.push(record);
                    added += 1;
                }
            }

            if records.len() as u64 >= total || raw_len < REGISTRY_PAGE_SIZE || added == 0 {
                break;
            }
            skip += REGISTRY_PAGE_SIZE;
            sleep(self.config.page_delay).await;
        }

        Ok(records)
    }
}

impl RegistrySearch for RegistryClient {
    async fn query(&self, params: &SearchParams) -> Vec<RegistryRecord> {
        if params.is_empty() {
            return Vec::new();
        }
        if !params.passes_geography_guard() {
            tracing::debug!(params = %params, "skipping registry call for non-US address");
            return Vec::new();
        }
        match self.fetch_all(params).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(params = %params, error = %err, "registry search failed");
                Vec::new()
            }
        }
    }
}
