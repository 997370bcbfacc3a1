/// Titles per editors query for languages without server-side filtering
pub const BATCH_SIZE: usize = 100;

/// Maximum connection attempts per replica before giving up
pub const MAX_RETRIES: u32 = 3;

/// TCP connect timeout in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout per query in seconds
pub const QUERY_TIMEOUT_SECS: u64 = 60;

/// Read timeout for the project-scoped queries, which scan far more rows
pub const EXTENDED_QUERY_TIMEOUT_SECS: u64 = 600;

/// Replica credential file name, looked up in the home directory
pub const CREDENTIAL_FILE: &str = "replica.my.cnf";

/// MySQL port on the analytics replicas
pub const DATABASE_PORT: u16 = 3306;

/// Host suffix for per-wiki analytics replicas
pub const ANALYTICS_HOST_SUFFIX: &str = ".analytics.db.svc.wikimedia.cloud";

/// Host of the wiki metadata catalog
pub const META_HOST: &str = "s7.analytics.db.svc.wikimedia.cloud";

/// Database name of the wiki metadata catalog
pub const META_DATABASE: &str = "meta_p";

/// Per-language title lists
pub const LANGUAGES_DIR: &str = "languages";

/// Per-language editor tallies
pub const EDITORS_DIR: &str = "editors";

/// Rendered wikitext reports
pub const REPORTS_DIR: &str = "reports";

/// Raw query results and the database-name mapping cache
pub const SQL_RESULTS_DIR: &str = "sqlresults";

/// Locally published report pages
pub const OUTBOX_DIR: &str = "outbox";

/// Workflow state document
pub const STATE_FILE: &str = "workflow_state.json";

/// Editors listed per report
pub const REPORT_RANK_LIMIT: usize = 100;

/// Base page for published report pages
pub const PUBLISH_BASE_PAGE: &str =
    "WikiProjectMed:WikiProject_Medicine/Stats/Top_medical_editors";
