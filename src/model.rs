use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::normalize::{is_present, normalize_text};

/// Standard identity fields a caller column can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    LastName,
    FirstName,
    InstitutionName,
    City,
    State,
    Zip,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::LastName,
        Field::FirstName,
        Field::InstitutionName,
        Field::City,
        Field::State,
        Field::Zip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::LastName => "last_name",
            Field::FirstName => "first_name",
            Field::InstitutionName => "institution_name",
            Field::City => "city",
            Field::State => "state",
            Field::Zip => "zip",
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        let name = name.trim().to_ascii_lowercase();
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Individual,
    Institution,
}

impl SubjectKind {
    /// The mapped field every row of this kind needs.
    pub fn required_field(self) -> Field {
        match self {
            SubjectKind::Individual => Field::LastName,
            SubjectKind::Institution => Field::InstitutionName,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::Individual => f.write_str("individual"),
            SubjectKind::Institution => f.write_str("institution"),
        }
    }
}

/// One input row's identity description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderQuery {
    pub last_name: Option<String>,
    pub first_name: Option<String>,
    pub institution_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl ProviderQuery {
    pub fn get(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::LastName => &self.last_name,
            Field::FirstName => &self.first_name,
            Field::InstitutionName => &self.institution_name,
            Field::City => &self.city,
            Field::State => &self.state,
            Field::Zip => &self.zip,
        };
        value.as_deref()
    }

    pub fn set(&mut self, field: Field, value: Option<String>) {
        let slot = match field {
            Field::LastName => &mut self.last_name,
            Field::FirstName => &mut self.first_name,
            Field::InstitutionName => &mut self.institution_name,
            Field::City => &mut self.city,
            Field::State => &mut self.state,
            Field::Zip => &mut self.zip,
        };
        *slot = value;
    }

    pub fn has(&self, field: Field) -> bool {
        is_present(self.get(field))
    }

    /// True when the value survives normalization, so it can be sent to the
    /// registry. A name written only in non-Latin script is present but not
    /// searchable.
    pub fn is_searchable(&self, field: Field) -> bool {
        !normalize_text(self.get(field)).is_empty()
    }

    /// A query can only resolve with a surname or an institution name.
    pub fn is_resolvable(&self) -> bool {
        self.has(Field::LastName) || self.has(Field::InstitutionName)
    }

    /// Short label used in log lines and the unmatched report.
    pub fn label(&self) -> String {
        if let Some(name) = self.institution_name.as_deref().filter(|v| is_present(Some(v))) {
            return name.trim().to_string();
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        parts.join(" ")
    }
}

/// One enumerated entity as returned by the registry. Never mutated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub number: String,
    #[serde(default)]
    pub enumeration_type: Option<String>,
    #[serde(default)]
    pub basic: RegistryBasic,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub addresses: Vec<RegistryAddress>,
    #[serde(default, rename = "practiceLocations", deserialize_with = "null_as_empty")]
    pub practice_locations: Vec<RegistryAddress>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub endpoints: Vec<RegistryAddress>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub taxonomies: Vec<Taxonomy>,
}

impl RegistryRecord {
    /// Main addresses, then practice locations, then endpoints.
    pub fn all_locations(&self) -> impl Iterator<Item = (&RegistryAddress, AddressKind)> {
        self.addresses
            .iter()
            .map(|a| (a, AddressKind::Main))
            .chain(self.practice_locations.iter().map(|a| (a, AddressKind::Practice)))
            .chain(self.endpoints.iter().map(|a| (a, AddressKind::Endpoint)))
    }

    pub fn primary_taxonomy(&self) -> Option<&Taxonomy> {
        self.taxonomies.first()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryBasic {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub name_prefix: Option<String>,
    pub name_suffix: Option<String>,
    pub credential: Option<String>,
    pub gender: Option<String>,
    pub sole_proprietor: Option<String>,
    pub status: Option<String>,
    pub organization_name: Option<String>,
    pub organizational_subpart: Option<String>,
    pub authorized_official_first_name: Option<String>,
    pub authorized_official_last_name: Option<String>,
    pub authorized_official_title_or_position: Option<String>,
    pub authorized_official_title: Option<String>,
}

/// Address, practice location or endpoint entry. Endpoint-only fields stay
/// `None` for the other two shapes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistryAddress {
    pub address_purpose: Option<String>,
    pub address_1: Option<String>,
    pub address_2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub telephone_number: Option<String>,
    pub fax_number: Option<String>,
    #[serde(rename = "endpointType")]
    pub endpoint_type: Option<String>,
    #[serde(rename = "endpointTypeDescription")]
    pub endpoint_type_description: Option<String>,
    pub endpoint: Option<String>,
    #[serde(rename = "affiliationName")]
    pub affiliation_name: Option<String>,
    #[serde(rename = "contentOtherDescription")]
    pub content_other_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Main,
    Practice,
    Endpoint,
}

impl AddressKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AddressKind::Main => "main",
            AddressKind::Practice => "practice",
            AddressKind::Endpoint => "endpoint",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    pub code: Option<String>,
    pub desc: Option<String>,
    pub taxonomy_group: Option<String>,
    pub license: Option<String>,
    pub state: Option<String>,
    pub primary: Option<bool>,
}

/// A verified record plus the search that produced it.
#[derive(Debug, Clone)]
pub struct MatchedRecord {
    pub record: RegistryRecord,
    pub provenance: String,
}

pub type MatchSet = Vec<MatchedRecord>;

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for NPI, got {other}"
        ))),
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
