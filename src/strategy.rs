//! The matching policy: an ordered table of query/verify pairs tried from the
//! most specific to the broadest. The first strategy that verifies at least one
//! record wins and nothing broader runs for that row.

use std::{collections::HashSet, time::Duration};
use tokio::time::sleep;

use crate::{
    constants::ORGANIZATION_ENUMERATION_TYPE,
    model::{Field, MatchSet, MatchedRecord, ProviderQuery, RegistryAddress, RegistryRecord, SubjectKind},
    normalize::same_text,
    registry::{RegistryParam, RegistrySearch, SearchParams},
};

/// One rung of the individual ladder.
#[derive(Debug)]
pub struct Strategy {
    pub name: &'static str,
    /// Every field must be present for the strategy to be attempted.
    pub required: &'static [Field],
    /// Fields sent to the registry, in order.
    pub params: &'static [(Field, RegistryParam)],
    pub verify: fn(&RegistryRecord, &ProviderQuery) -> bool,
    /// Maximum number of accepted records.
    pub cap: Option<usize>,
}

impl Strategy {
    pub fn is_eligible(&self, query: &ProviderQuery) -> bool {
        self.required.iter().all(|f| query.is_searchable(*f))
    }

    pub fn search_params(&self, query: &ProviderQuery) -> SearchParams {
        let mut params = SearchParams::new();
        for (field, key) in self.params {
            params.insert(*key, query.get(*field));
        }
        params
    }
}

const FIRST: (Field, RegistryParam) = (Field::FirstName, RegistryParam::FirstName);
const LAST: (Field, RegistryParam) = (Field::LastName, RegistryParam::LastName);
const CITY: (Field, RegistryParam) = (Field::City, RegistryParam::City);
const STATE: (Field, RegistryParam) = (Field::State, RegistryParam::State);

pub static INDIVIDUAL_STRATEGIES: [Strategy; 6] = [
    Strategy {
        name: "first+last name, city, state",
        required: &[Field::FirstName, Field::LastName, Field::City, Field::State],
        params: &[FIRST, LAST, CITY, STATE],
        verify: verify_full_name_city_state,
        cap: None,
    },
    Strategy {
        name: "first+last name, state",
        required: &[Field::FirstName, Field::LastName, Field::State],
        params: &[FIRST, LAST, STATE],
        verify: verify_full_name_state,
        cap: None,
    },
    Strategy {
        name: "last name, city, state",
        required: &[Field::LastName, Field::City, Field::State],
        params: &[LAST, CITY, STATE],
        verify: verify_last_name_city_state,
        cap: None,
    },
    Strategy {
        name: "last name, state",
        required: &[Field::LastName, Field::State],
        params: &[LAST, STATE],
        verify: verify_last_name_state,
        cap: None,
    },
    Strategy {
        name: "first+last name",
        required: &[Field::FirstName, Field::LastName],
        params: &[FIRST, LAST],
        verify: verify_full_name_plausible_location,
        cap: None,
    },
    Strategy {
        name: "last name",
        required: &[Field::LastName],
        params: &[LAST],
        verify: verify_last_name_plausible_location,
        cap: Some(10),
    },
];

fn last_name_matches(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    same_text(record.basic.last_name.as_deref(), query.last_name.as_deref())
}

fn full_name_matches(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    last_name_matches(record, query)
        && same_text(record.basic.first_name.as_deref(), query.first_name.as_deref())
}

fn city_state_matches(address: &RegistryAddress, query: &ProviderQuery) -> bool {
    same_text(address.city.as_deref(), query.city.as_deref()) && state_matches(address, query)
}

fn state_matches(address: &RegistryAddress, query: &ProviderQuery) -> bool {
    same_text(address.state.as_deref(), query.state.as_deref())
}

/// Graduated check over addresses, practice locations and endpoints: city and
/// state when both were given, state alone when only it was given, otherwise
/// nothing to check.
fn location_plausible(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    let has_city = query.has(Field::City);
    let has_state = query.has(Field::State);
    let mut locations = record.all_locations().map(|(address, _)| address);
    if has_city && has_state {
        locations.any(|a| city_state_matches(a, query))
    } else if has_state {
        locations.any(|a| state_matches(a, query))
    } else {
        true
    }
}

fn verify_full_name_city_state(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    full_name_matches(record, query)
        && record.addresses.iter().any(|a| city_state_matches(a, query))
}

fn verify_full_name_state(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    full_name_matches(record, query) && record.addresses.iter().any(|a| state_matches(a, query))
}

fn verify_last_name_city_state(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    last_name_matches(record, query)
        && record.addresses.iter().any(|a| city_state_matches(a, query))
}

fn verify_last_name_state(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    last_name_matches(record, query) && record.addresses.iter().any(|a| state_matches(a, query))
}

fn verify_full_name_plausible_location(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    full_name_matches(record, query) && location_plausible(record, query)
}

fn verify_last_name_plausible_location(record: &RegistryRecord, query: &ProviderQuery) -> bool {
    let first_ok = !query.has(Field::FirstName)
        || same_text(record.basic.first_name.as_deref(), query.first_name.as_deref());
    last_name_matches(record, query) && first_ok && location_plausible(record, query)
}

fn accept_all(params: &SearchParams, records: Vec<RegistryRecord>) -> MatchSet {
    let provenance = format!("organization name: {params}");
    let mut seen = HashSet::new();
    let matches: MatchSet = records
        .into_iter()
        .filter(|r| seen.insert(r.number.clone()))
        .map(|record| MatchedRecord {
            record,
            provenance: provenance.clone(),
        })
        .collect();
    tracing::info!(params = %params, matches = matches.len(), "organization search finished");
    matches
}

pub struct StrategyLadder<R> {
    registry: R,
    strategy_delay: Duration,
}

impl<R: RegistrySearch> StrategyLadder<R> {
    pub fn new(registry: R, strategy_delay: Duration) -> Self {
        Self {
            registry,
            strategy_delay,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub async fn resolve(&self, kind: SubjectKind, query: &ProviderQuery) -> MatchSet {
        match kind {
            SubjectKind::Institution => self.resolve_institution(query).await,
            SubjectKind::Individual => self.resolve_individual(query).await,
        }
    }

    /// Organization-name search is trusted as self-verifying: every hit is
    /// accepted.
    async fn resolve_institution(&self, query: &ProviderQuery) -> MatchSet {
        if !query.is_searchable(Field::InstitutionName) {
            return Vec::new();
        }
        let name_only = SearchParams::new()
            .with(RegistryParam::OrganizationName, query.institution_name.as_deref())
            .with(RegistryParam::EnumerationType, Some(ORGANIZATION_ENUMERATION_TYPE));

        if query.is_searchable(Field::State) {
            let params = name_only
                .clone()
                .with(RegistryParam::State, query.state.as_deref());
            let records = self.registry.query(&params).await;
            if !records.is_empty() {
                return accept_all(&params, records);
            }
            tracing::debug!(params = %params, "no organization hits with state; retrying name only");
            sleep(self.strategy_delay).await;
        }

        let records = self.registry.query(&name_only).await;
        accept_all(&name_only, records)
    }

    async fn resolve_individual(&self, query: &ProviderQuery) -> MatchSet {
        let mut seen: HashSet<String> = HashSet::new();

        for (idx, strategy) in INDIVIDUAL_STRATEGIES.iter().enumerate() {
            let step = idx + 1;
            if !strategy.is_eligible(query) {
                tracing::debug!(step, strategy = strategy.name, "missing required fields; skipped");
                continue;
            }

            let params = strategy.search_params(query);
            let candidates = self.registry.query(&params).await;
            let raw = candidates.len();
            let provenance = format!("strategy {step} ({}): {params}", strategy.name);

            let mut accepted: MatchSet = Vec::new();
            for record in candidates {
                if seen.contains(&record.number) || !(strategy.verify)(&record, query) {
                    continue;
                }
                seen.insert(record.number.clone());
                accepted.push(MatchedRecord {
                    record,
                    provenance: provenance.clone(),
                });
                if strategy.cap.is_some_and(|cap| accepted.len() >= cap) {
                    break;
                }
            }

            if !accepted.is_empty() {
                tracing::info!(
                    step,
                    strategy = strategy.name,
                    raw,
                    verified = accepted.len(),
                    "strategy matched"
                );
                return accepted;
            }

            tracing::debug!(step, strategy = strategy.name, params = %params, raw, "no verified matches");
            sleep(self.strategy_delay).await;
        }

        Vec::new()
    }
}
