use crate::config::{CONNECT_TIMEOUT_SECS, CREDENTIAL_FILE, DATABASE_PORT, MAX_RETRIES, QUERY_TIMEOUT_SECS};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Database-layer failure taxonomy. Only `Transient` is ever retried.
#[derive(Debug, Error)]
pub enum DbError {
    /// Missing or malformed local configuration. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection-level failure that may succeed on retry.
    #[error("transient database error: {0}")]
    Transient(String),

    /// Bad query text. Retrying cannot help.
    #[error("query error: {message} (query: {query_prefix})")]
    Query {
        message: String,
        query_prefix: String,
    },
}

impl DbError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Transient(_))
    }
}

/// Replica credentials parsed from a my.cnf-style file.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// `~/replica.my.cnf`, the standard Toolforge credential drop.
    pub fn default_path() -> PathBuf {
        match std::env::var_os("HOME") {
            Some(home) => Path::new(&home).join(CREDENTIAL_FILE),
            None => PathBuf::from(CREDENTIAL_FILE),
        }
    }

    pub fn load(path: &Path) -> Result<Self, DbError> {
        let contents = fs::read_to_string(path).map_err(|_| {
            DbError::Config(format!("credential file not found: {}", path.display()))
        })?;

        let mut user = None;
        let mut password = None;
        for line in contents.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("user") {
                user = cnf_value(rest);
            } else if let Some(rest) = line.strip_prefix("password") {
                password = cnf_value(rest);
            }
        }

        match (user, password) {
            (Some(user), Some(password)) => {
                debug!(path = %path.display(), "Credentials loaded");
                Ok(Self { user, password })
            }
            _ => Err(DbError::Config(format!(
                "invalid credential file format: {}",
                path.display()
            ))),
        }
    }
}

fn cnf_value(rest: &str) -> Option<String> {
    let value = rest.trim_start().strip_prefix('=')?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Resolved connection coordinates for one replica database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTarget {
    pub host: String,
    pub database: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl DbTarget {
    pub fn new(host: String, database: String) -> Self {
        Self {
            host,
            database,
            port: DATABASE_PORT,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(QUERY_TIMEOUT_SECS),
        }
    }

    /// Some wikis need far longer than the default to answer their queries.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A result cell after normalization. Binary payloads are decoded to text
/// with invalid sequences replaced, so identity comparisons stay stable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Null,
}

/// One normalized result row, keyed by column name.
pub type Row = FxHashMap<String, SqlValue>;

/// Missing or null columns read as the empty string.
pub fn row_str<'a>(row: &'a Row, column: &str) -> &'a str {
    match row.get(column) {
        Some(SqlValue::Text(text)) => text,
        _ => "",
    }
}

/// Missing, null, or non-numeric columns read as zero.
pub fn row_i64(row: &Row, column: &str) -> i64 {
    match row.get(column) {
        Some(SqlValue::Int(n)) => *n,
        Some(SqlValue::Text(text)) => text.parse().unwrap_or(0),
        _ => 0,
    }
}

/// One open replica connection. Dropping the value closes it, so release
/// happens on every exit path.
pub trait Replica {
    fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<Row>, DbError>;
}

/// Opens replica connections. The mock side of this trait is what the test
/// suites run the workflow against.
pub trait Connector {
    fn connect(&self, target: &DbTarget) -> Result<Box<dyn Replica>, DbError>;
}

/// Retries `attempt` on transient failures, sleeping `2^n` seconds after
/// attempt `n`. The sleep is injected so tests record waits instead of
/// serving them.
pub fn retry_with_backoff<T>(
    max_retries: u32,
    sleep: &mut dyn FnMut(Duration),
    mut attempt: impl FnMut(u32) -> Result<T, DbError>,
) -> Result<T, DbError> {
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt(tries) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tries < max_retries => {
                let wait = Duration::from_secs(1u64 << tries);
                warn!(
                    attempt = tries,
                    max = max_retries,
                    wait_secs = wait.as_secs(),
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                sleep(wait);
            }
            Err(e) => {
                if e.is_transient() {
                    error!(attempts = tries, error = %e, "Giving up after retries");
                }
                return Err(e);
            }
        }
    }
}

/// `Connector` backed by the `mysql` client. Credentials load on first use;
/// credential problems are configuration errors and are never retried.
pub struct MysqlConnector {
    credential_path: PathBuf,
    credentials: OnceCell<Credentials>,
}

impl MysqlConnector {
    pub fn new(credential_path: PathBuf) -> Self {
        Self {
            credential_path,
            credentials: OnceCell::new(),
        }
    }

    fn credentials(&self) -> Result<&Credentials, DbError> {
        self.credentials
            .get_or_try_init(|| Credentials::load(&self.credential_path))
    }
}

impl Connector for MysqlConnector {
    fn connect(&self, target: &DbTarget) -> Result<Box<dyn Replica>, DbError> {
        let credentials = self.credentials()?;
        let conn = retry_with_backoff(MAX_RETRIES, &mut thread::sleep, |attempt| {
            debug!(
                host = %target.host,
                database = %target.database,
                attempt,
                max = MAX_RETRIES,
                "Connecting"
            );
            open_connection(target, credentials)
        })?;
        info!(host = %target.host, database = %target.database, "Connected");
        Ok(Box::new(MysqlReplica { conn }))
    }
}

fn open_connection(target: &DbTarget, credentials: &Credentials) -> Result<Conn, DbError> {
    let opts = OptsBuilder::new()
        .ip_or_hostname(Some(target.host.clone()))
        .tcp_port(target.port)
        .db_name(Some(target.database.clone()))
        .user(Some(credentials.user.clone()))
        .pass(Some(credentials.password.clone()))
        .tcp_connect_timeout(Some(target.connect_timeout))
        .read_timeout(Some(target.read_timeout));

    Conn::new(opts).map_err(|e| classify_connect_error(&e))
}

struct MysqlReplica {
    conn: Conn,
}

impl Replica for MysqlReplica {
    fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<Row>, DbError> {
        debug!(query = %query_prefix(sql), params = params.len(), "Executing query");

        let bound = if params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(params.iter().map(|p| mysql::Value::from(p.as_str())).collect())
        };

        let rows: Vec<mysql::Row> = self.conn.exec(sql, bound).map_err(|e| {
            let classified = classify_query_error(&e, sql);
            if let DbError::Query { message, query_prefix } = &classified {
                error!(error = %message, query = %query_prefix, "Query failed");
            }
            classified
        })?;

        debug!(rows = rows.len(), "Query returned");
        Ok(rows.into_iter().map(normalize_row).collect())
    }
}

fn normalize_row(row: mysql::Row) -> Row {
    let columns = row.columns();
    let values = row.unwrap();
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| (column.name_str().to_string(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: mysql::Value) -> SqlValue {
    match value {
        mysql::Value::NULL => SqlValue::Null,
        mysql::Value::Bytes(bytes) => SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        mysql::Value::Int(n) => SqlValue::Int(n),
        mysql::Value::UInt(n) => SqlValue::Int(n as i64),
        other => SqlValue::Text(other.as_sql(true)),
    }
}

/// Server error codes that indicate bad query text rather than a connection
/// problem: unknown column, parse error, missing table, bad table name.
const PROGRAMMING_ERROR_CODES: &[u16] = &[1054, 1064, 1146, 1149];

fn classify_connect_error(error: &mysql::Error) -> DbError {
    match error {
        mysql::Error::UrlError(e) => DbError::Config(e.to_string()),
        other => DbError::Transient(other.to_string()),
    }
}

fn classify_query_error(error: &mysql::Error, sql: &str) -> DbError {
    match error {
        mysql::Error::MySqlError(e) if PROGRAMMING_ERROR_CODES.contains(&e.code) => {
            DbError::Query {
                message: e.to_string(),
                query_prefix: query_prefix(sql),
            }
        }
        other => DbError::Transient(other.to_string()),
    }
}

fn query_prefix(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(120).collect()
}
