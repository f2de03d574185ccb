use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Field, SubjectKind};

const LAST_NAME_SYNONYMS: &[&str] = &[
    "last", "lastname", "last_name", "last name", "surname", "family name", "familyname",
    "family_name", "lname", "l_name",
];
const FIRST_NAME_SYNONYMS: &[&str] = &[
    "first", "firstname", "first_name", "first name", "given name", "givenname", "given_name",
    "fname", "f_name",
];
const INSTITUTION_NAME_SYNONYMS: &[&str] = &[
    "institution", "institution_name", "institution name", "facility", "facility_name",
    "facilityname", "facility name", "organization", "organization_name", "organizationname",
    "organization name", "org", "org_name", "orgname", "org name", "hospital", "hospital_name",
    "hospitalname", "hospital name", "clinic", "clinic_name", "clinicname", "clinic name",
    "practice", "practice_name", "practicename", "practice name",
];
const CITY_SYNONYMS: &[&str] = &["city", "city_name", "cityname", "city name", "municipality", "town"];
const STATE_SYNONYMS: &[&str] = &[
    "state", "state_name", "statename", "state name", "st", "province", "region",
];
const ZIP_SYNONYMS: &[&str] = &[
    "zip", "zipcode", "zip_code", "zip code", "postal", "postalcode", "postal_code", "postal code",
    "postcode", "post_code", "post code",
];

/// Header fragments that mark an institution roster.
const INSTITUTION_INDICATORS: &[&str] = &[
    "facility", "hospital", "clinic", "center", "institution", "organization",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no identity columns mapped; map last_name (individuals) or institution_name (institutions)")]
    NoIdentityColumns,
    #[error("missing required column for {kind}s: {field}")]
    MissingRequiredField { kind: SubjectKind, field: Field },
    #[error("column '{column}' mapped to {field} is not in the input")]
    UnknownColumn { field: Field, column: String },
}

/// Lowercase, `_`/`-` as spaces, single-spaced.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Recognized header spellings per standard field, in priority order.
#[derive(Debug, Clone)]
pub struct ColumnSynonyms {
    by_field: BTreeMap<Field, Vec<String>>,
}

impl Default for ColumnSynonyms {
    fn default() -> Self {
        let table: [(Field, &[&str]); 6] = [
            (Field::LastName, LAST_NAME_SYNONYMS),
            (Field::FirstName, FIRST_NAME_SYNONYMS),
            (Field::InstitutionName, INSTITUTION_NAME_SYNONYMS),
            (Field::City, CITY_SYNONYMS),
            (Field::State, STATE_SYNONYMS),
            (Field::Zip, ZIP_SYNONYMS),
        ];
        let by_field = table
            .into_iter()
            .map(|(field, names)| (field, names.iter().map(|s| s.to_string()).collect()))
            .collect();
        Self { by_field }
    }
}

impl ColumnSynonyms {
    /// Adds a caller-supplied spelling after the built-in ones.
    pub fn add(&mut self, field: Field, name: &str) {
        self.by_field.entry(field).or_default().push(name.to_string());
    }

    pub fn for_field(&self, field: Field) -> &[String] {
        self.by_field.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Which input column feeds each standard field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<Field, String>,
}

impl ColumnMapping {
    pub fn set(&mut self, field: Field, column: impl Into<String>) {
        self.columns.insert(field, column.into());
    }

    pub fn column(&self, field: Field) -> Option<&str> {
        self.columns.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.columns.iter().map(|(f, c)| (*f, c.as_str()))
    }

    /// Institution when an institution column is mapped, individual when both
    /// name columns are mapped, otherwise decided by institution-sounding
    /// headers.
    pub fn subject_kind(&self, headers: &[String]) -> SubjectKind {
        if self.columns.contains_key(&Field::InstitutionName) {
            return SubjectKind::Institution;
        }
        if self.columns.contains_key(&Field::LastName) && self.columns.contains_key(&Field::FirstName) {
            return SubjectKind::Individual;
        }
        let institution_header = headers.iter().any(|h| {
            let h = h.to_lowercase();
            INSTITUTION_INDICATORS.iter().any(|ind| h.contains(ind))
        });
        if institution_header {
            SubjectKind::Institution
        } else {
            SubjectKind::Individual
        }
    }

    /// Checks the mapping against the input headers before any row runs.
    pub fn validate(&self, headers: &[String]) -> Result<SubjectKind, ConfigError> {
        if self.column(Field::LastName).is_none() && self.column(Field::InstitutionName).is_none() {
            return Err(ConfigError::NoIdentityColumns);
        }
        for (field, column) in self.iter() {
            if !headers.iter().any(|h| h == column) {
                return Err(ConfigError::UnknownColumn {
                    field,
                    column: column.to_string(),
                });
            }
        }
        let kind = self.subject_kind(headers);
        let required = kind.required_field();
        if self.column(required).is_none() {
            return Err(ConfigError::MissingRequiredField {
                kind,
                field: required,
            });
        }
        Ok(kind)
    }
}

/// Maps each standard field to the first header matching one of its synonyms.
pub fn auto_detect_columns(headers: &[String], synonyms: &ColumnSynonyms) -> ColumnMapping {
    let normalized: Vec<(String, &String)> = headers
        .iter()
        .map(|h| (normalize_column_name(h), h))
        .collect();

    let mut mapping = ColumnMapping::default();
    for field in Field::ALL {
        let hit = synonyms.for_field(field).iter().find_map(|candidate| {
            let candidate = normalize_column_name(candidate);
            normalized
                .iter()
                .find(|(norm, _)| *norm == candidate)
                .map(|(_, original)| (*original).clone())
        });
        if let Some(column) = hit {
            mapping.set(field, column);
        }
    }
    mapping
}
