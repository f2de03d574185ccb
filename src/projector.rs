//! Flattens a verified registry record into one output row.

use crate::{
    model::{AddressKind, MatchedRecord, RegistryAddress, RegistryRecord, SubjectKind},
    normalize::title_case,
};

pub const INPUT_COLUMN_PREFIX: &str = "input_";

const ADDRESS_COLUMNS: [&str; 7] = ["address", "address_2", "city", "state", "zip", "phone", "fax"];

const INSTITUTION_COLUMNS: [&str; 9] = [
    "organization_name",
    "npi",
    "organizational_subpart",
    "authorized_official_first_name",
    "authorized_official_last_name",
    "authorized_official_title",
    "status",
    "taxonomy_desc",
    "taxonomy_group",
];

const INDIVIDUAL_COLUMNS: [&str; 14] = [
    "first_name",
    "last_name",
    "npi",
    "middle_name",
    "name_prefix",
    "name_suffix",
    "credential",
    "gender",
    "sole_proprietor",
    "status",
    "taxonomy_desc",
    "taxonomy_group",
    "license_number",
    "license_state",
];

const PROVENANCE_COLUMNS: [&str; 2] = ["address_type", "search_criteria_used"];

const ENDPOINT_COLUMNS: [&str; 5] = [
    "endpoint_type",
    "endpoint_type_desc",
    "endpoint",
    "affiliation_name",
    "content_other_desc",
];

/// Every column a row of `kind` can carry, in the order [`project`] emits
/// them. Streamed output uses this as its fixed header.
pub fn output_headers(kind: SubjectKind, input_headers: &[String]) -> Vec<String> {
    let (base, address_after): (&[&str], usize) = match kind {
        SubjectKind::Institution => (&INSTITUTION_COLUMNS[..], 2),
        SubjectKind::Individual => (&INDIVIDUAL_COLUMNS[..], 3),
    };
    let mut headers: Vec<String> = Vec::new();
    headers.extend(base[..address_after].iter().map(|c| c.to_string()));
    headers.extend(ADDRESS_COLUMNS.iter().map(|c| c.to_string()));
    headers.extend(base[address_after..].iter().map(|c| c.to_string()));
    headers.extend(PROVENANCE_COLUMNS.iter().map(|c| c.to_string()));
    headers.extend(
        input_headers
            .iter()
            .map(|h| format!("{INPUT_COLUMN_PREFIX}{h}")),
    );
    headers.extend(ENDPOINT_COLUMNS.iter().map(|c| c.to_string()));
    headers
}

/// Ordered `(column, value)` pairs for one match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputRow {
    pub npi: String,
    columns: Vec<(String, String)>,
}

impl OutputRow {
    fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.columns.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }
}

/// Output rows plus the union of their columns in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct OutputTable {
    pub headers: Vec<String>,
    pub rows: Vec<OutputRow>,
}

impl OutputTable {
    pub fn push(&mut self, row: OutputRow) {
        for name in row.column_names() {
            if !self.headers.iter().any(|h| h == name) {
                self.headers.push(name.to_string());
            }
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Each row padded with empty strings to the full header set.
    pub fn records(&self) -> impl Iterator<Item = Vec<&str>> {
        self.rows.iter().map(|row| {
            self.headers
                .iter()
                .map(|h| row.get(h).unwrap_or(""))
                .collect()
        })
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn display(value: &Option<String>) -> String {
    title_case(value.as_deref())
}

/// First main address, else first practice location, else first endpoint.
pub fn choose_address(record: &RegistryRecord) -> Option<(&RegistryAddress, AddressKind)> {
    record.all_locations().next()
}

/// Builds the output row for `matched`, echoing the input row as `input_*`
/// columns. Records without any address entry produce nothing.
pub fn project(
    kind: SubjectKind,
    matched: &MatchedRecord,
    input_headers: &[String],
    input_row: &[Option<String>],
) -> Option<OutputRow> {
    let record = &matched.record;
    let (address, address_kind) = choose_address(record)?;
    let basic = &record.basic;
    let taxonomy = record.primary_taxonomy();
    let taxonomy_desc = taxonomy.map(|t| text(&t.desc)).unwrap_or_default();
    let taxonomy_group = taxonomy.map(|t| text(&t.taxonomy_group)).unwrap_or_default();

    let mut row = OutputRow {
        npi: record.number.clone(),
        ..Default::default()
    };

    match kind {
        SubjectKind::Institution => {
            row.push("organization_name", display(&basic.organization_name));
            row.push("npi", record.number.as_str());
            push_address(&mut row, address);
            row.push("organizational_subpart", text(&basic.organizational_subpart));
            row.push(
                "authorized_official_first_name",
                display(&basic.authorized_official_first_name),
            );
            row.push(
                "authorized_official_last_name",
                display(&basic.authorized_official_last_name),
            );
            let title = basic
                .authorized_official_title_or_position
                .as_ref()
                .or(basic.authorized_official_title.as_ref());
            row.push("authorized_official_title", title_case(title.map(String::as_str)));
            row.push("status", text(&basic.status));
            row.push("taxonomy_desc", taxonomy_desc);
            row.push("taxonomy_group", taxonomy_group);
        }
        SubjectKind::Individual => {
            row.push("first_name", display(&basic.first_name));
            row.push("last_name", display(&basic.last_name));
            row.push("npi", record.number.as_str());
            push_address(&mut row, address);
            row.push("middle_name", display(&basic.middle_name));
            row.push("name_prefix", text(&basic.name_prefix));
            row.push("name_suffix", text(&basic.name_suffix));
            row.push("credential", text(&basic.credential));
            row.push("gender", text(&basic.gender));
            row.push("sole_proprietor", text(&basic.sole_proprietor));
            row.push("status", text(&basic.status));
            row.push("taxonomy_desc", taxonomy_desc);
            row.push("taxonomy_group", taxonomy_group);
            row.push(
                "license_number",
                taxonomy.map(|t| text(&t.license)).unwrap_or_default(),
            );
            row.push(
                "license_state",
                taxonomy.map(|t| text(&t.state)).unwrap_or_default(),
            );
        }
    }
    row.push("address_type", address_kind.as_str());
    row.push("search_criteria_used", matched.provenance.as_str());

    for (idx, header) in input_headers.iter().enumerate() {
        let value = input_row.get(idx).cloned().flatten().unwrap_or_default();
        row.push(format!("{INPUT_COLUMN_PREFIX}{header}"), value);
    }

    if address_kind == AddressKind::Endpoint {
        row.push("endpoint_type", text(&address.endpoint_type));
        row.push("endpoint_type_desc", text(&address.endpoint_type_description));
        row.push("endpoint", text(&address.endpoint));
        row.push("affiliation_name", text(&address.affiliation_name));
        row.push("content_other_desc", text(&address.content_other_description));
    }

    Some(row)
}

fn push_address(row: &mut OutputRow, address: &RegistryAddress) {
    row.push("address", display(&address.address_1));
    row.push("address_2", display(&address.address_2));
    row.push("city", display(&address.city));
    row.push(
        "state",
        address
            .state
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_default(),
    );
    row.push("zip", text(&address.postal_code));
    row.push("phone", text(&address.telephone_number));
    row.push("fax", text(&address.fax_number));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RegistryBasic, Taxonomy};

    fn matched(record: RegistryRecord) -> MatchedRecord {
        MatchedRecord {
            record,
            provenance: "strategy 4 (last name, state): last_name=Smith, state=CA".into(),
        }
    }

    fn individual() -> RegistryRecord {
        RegistryRecord {
            number: "1234567893".into(),
            basic: RegistryBasic {
                first_name: Some("JANE".into()),
                last_name: Some("SMITH".into()),
                credential: Some("MD".into()),
                ..Default::default()
            },
            addresses: vec![RegistryAddress {
                address_1: Some("100 N FIRST ST".into()),
                city: Some("FRESNO".into()),
                state: Some("ca".into()),
                postal_code: Some("937011234".into()),
                telephone_number: Some("559-555-0100".into()),
                ..Default::default()
            }],
            taxonomies: vec![
                Taxonomy {
                    desc: Some("Family Medicine".into()),
                    license: Some("A12345".into()),
                    state: Some("CA".into()),
                    ..Default::default()
                },
                Taxonomy {
                    desc: Some("Sports Medicine".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn individual_columns_in_order() {
        let headers = vec!["Last".to_string(), "State".to_string()];
        let input = vec![Some("Smith".to_string()), None];
        let row = project(SubjectKind::Individual, &matched(individual()), &headers, &input).unwrap();

        let names: Vec<&str> = row.column_names().collect();
        assert_eq!(&names[..4], &["first_name", "last_name", "npi", "address"]);
        assert_eq!(&names[names.len() - 4..], &[
            "address_type",
            "search_criteria_used",
            "input_Last",
            "input_State"
        ]);
        assert_eq!(row.get("first_name"), Some("Jane"));
        assert_eq!(row.get("address"), Some("100 N First St"));
        assert_eq!(row.get("state"), Some("CA"));
        assert_eq!(row.get("taxonomy_desc"), Some("Family Medicine"));
        assert_eq!(row.get("license_number"), Some("A12345"));
        assert_eq!(row.get("address_type"), Some("main"));
        assert_eq!(row.get("input_State"), Some(""));
        assert_eq!(row.get("endpoint"), None);
        assert!(row.get("search_criteria_used").unwrap().starts_with("strategy 4"));
    }

    #[test]
    fn institution_columns_and_endpoint_fallback() {
        let record = RegistryRecord {
            number: "1999999992".into(),
            basic: RegistryBasic {
                organization_name: Some("MERCY GENERAL HOSPITAL".into()),
                authorized_official_title_or_position: Some("CHIEF EXECUTIVE".into()),
                ..Default::default()
            },
            endpoints: vec![RegistryAddress {
                endpoint_type: Some("DIRECT".into()),
                endpoint: Some("records@mercy.direct.example".into()),
                affiliation_name: Some("Mercy Health".into()),
                state: Some("CA".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let row = project(SubjectKind::Institution, &matched(record), &[], &[]).unwrap();

        assert_eq!(row.column_names().next(), Some("organization_name"));
        assert_eq!(row.get("organization_name"), Some("Mercy General Hospital"));
        assert_eq!(row.get("authorized_official_title"), Some("Chief Executive"));
        assert_eq!(row.get("address_type"), Some("endpoint"));
        assert_eq!(row.get("endpoint"), Some("records@mercy.direct.example"));
        assert_eq!(row.get("affiliation_name"), Some("Mercy Health"));
        assert_eq!(row.get("taxonomy_desc"), Some(""));
        assert_eq!(row.get("first_name"), None);
    }

    #[test]
    fn fixed_headers_cover_projected_rows_in_order() {
        let headers = vec!["Last".to_string()];
        let input = vec![Some("Smith".to_string())];
        let mut endpoint_only = individual();
        endpoint_only.addresses.clear();
        endpoint_only.endpoints.push(RegistryAddress {
            endpoint: Some("jane@direct.example".into()),
            ..Default::default()
        });

        let fixed = output_headers(SubjectKind::Individual, &headers);
        for record in [individual(), endpoint_only] {
            let row = project(SubjectKind::Individual, &matched(record), &headers, &input).unwrap();
            let positions: Vec<usize> = row
                .column_names()
                .map(|name| fixed.iter().position(|h| h == name).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }

        let institution = output_headers(SubjectKind::Institution, &[]);
        assert_eq!(&institution[..3], &["organization_name", "npi", "address"]);
        assert_eq!(institution.last().map(String::as_str), Some("content_other_desc"));
    }

    #[test]
    fn record_without_locations_is_skipped() {
        let mut record = individual();
        record.addresses.clear();
        assert!(project(SubjectKind::Individual, &matched(record), &[], &[]).is_none());
    }

    #[test]
    fn table_unions_columns() {
        let mut table = OutputTable::default();
        let plain = project(SubjectKind::Individual, &matched(individual()), &[], &[]).unwrap();
        let mut with_endpoint = individual();
        with_endpoint.addresses.clear();
        with_endpoint.endpoints.push(RegistryAddress {
            endpoint: Some("jane@direct.example".into()),
            ..Default::default()
        });
        let endpoint_row =
            project(SubjectKind::Individual, &matched(with_endpoint), &[], &[]).unwrap();

        table.push(plain);
        table.push(endpoint_row);

        assert!(table.headers.iter().any(|h| h == "endpoint"));
        let records: Vec<Vec<&str>> = table.records().collect();
        assert_eq!(records[0].len(), table.headers.len());
        let endpoint_idx = table.headers.iter().position(|h| h == "endpoint").unwrap();
        assert_eq!(records[0][endpoint_idx], "");
        assert_eq!(records[1][endpoint_idx], "jane@direct.example");
    }
}
