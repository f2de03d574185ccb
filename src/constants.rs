pub const DEFAULT_NPI_API_BASE_URL: &str = "https://npiregistry.cms.hhs.gov/api/";
pub const DEFAULT_NPI_API_VERSION: &str = "2.1";
pub const USER_AGENT: &str = "npi-resolver/0.1";

pub const NPPES_RATE_LIMIT_NOTICE_URL: &str = "https://npiregistry.cms.hhs.gov/";
pub const NPPES_API_DOC_URL: &str = "https://npiregistry.cms.hhs.gov/api-page";

/// Registry maximum for `limit`.
pub const REGISTRY_PAGE_SIZE: usize = 200;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 100;
pub const DEFAULT_STRATEGY_DELAY_MS: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Enumeration type the registry uses for organizations.
pub const ORGANIZATION_ENUMERATION_TYPE: &str = "NPI-2";

/// 50 states, DC and PR.
pub const US_STATE_CODES: [&str; 52] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA", "KS",
    "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY",
    "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA", "WV",
    "WI", "WY", "DC", "PR",
];
