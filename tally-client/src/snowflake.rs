//! Snowflake SQL API v2 client
//!
//! Statements are submitted with `POST /api/v2/statements`. Short statements
//! answer `200` with the first result partition inline; long ones answer
//! `202` and are polled by handle until they finish. Remaining partitions are
//! fetched one by one.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, Result};

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Connection settings for the SQL API
#[derive(Clone)]
pub struct SnowflakeConfig {
    /// Account URL, e.g. `https://myorg-myaccount.snowflakecomputing.com`
    pub account_url: String,
    pub token: String,
    /// Value of `X-Snowflake-Authorization-Token-Type` (`OAUTH`, `KEYPAIR_JWT`, ...)
    pub token_type: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    /// Server-side statement timeout in seconds
    pub statement_timeout_secs: u64,
    /// Delay between status polls for statements still running
    pub poll_interval: Duration,
}

impl std::fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account_url", &self.account_url)
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("statement_timeout_secs", &self.statement_timeout_secs)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Rows returned by a statement, all values as Snowflake renders them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub statement_handle: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column, matched case-insensitively
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value at `row` for column `name`
    pub fn value(&self, row: usize, name: &str) -> Option<&str> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

/// Outcome of reading one statement response
enum Poll {
    Done(StatementResponse),
    Running(StatementResponse),
}

/// HTTP client for the Snowflake SQL API
#[derive(Debug, Clone)]
pub struct SnowflakeClient {
    base_url: String,
    config: SnowflakeConfig,
    client: Client,
}

impl SnowflakeClient {
    pub fn new(config: SnowflakeConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Create a client with a custom HTTP client
    pub fn with_client(config: SnowflakeConfig, client: Client) -> Self {
        Self {
            base_url: config.account_url.trim_end_matches('/').to_string(),
            config,
            client,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.config.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::USER_AGENT, concat!("tally/", env!("CARGO_PKG_VERSION")))
    }

    /// Execute one SQL statement and collect every result row
    pub async fn execute(&self, sql: &str) -> Result<ResultSet> {
        let request_id = Uuid::new_v4();
        let url = format!("{}{}?requestId={}", self.base_url, STATEMENTS_PATH, request_id);
        let body = StatementRequest {
            statement: sql,
            timeout: self.config.statement_timeout_secs,
            database: self.config.database.as_deref(),
            schema: self.config.schema.as_deref(),
            warehouse: self.config.warehouse.as_deref(),
            role: self.config.role.as_deref(),
        };

        debug!(request_id = %request_id, "Submitting statement");
        let response = self.authorized(self.client.post(&url)).json(&body).send().await?;

        let mut poll = read_statement(response).await?;
        let first = loop {
            match poll {
                Poll::Done(resp) => break resp,
                Poll::Running(resp) => {
                    let handle = resp.statement_handle.ok_or_else(|| {
                        ClientError::ParseError(
                            "statement still running but no handle was returned".to_string(),
                        )
                    })?;
                    debug!(statement_handle = %handle, "Statement running, polling");
                    tokio::time::sleep(self.config.poll_interval).await;
                    poll = self.status(&handle, None).await?;
                }
            }
        };

        self.collect(first).await
    }

    async fn status(&self, handle: &str, partition: Option<usize>) -> Result<Poll> {
        let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
        let mut request = self.authorized(self.client.get(&url));
        if let Some(partition) = partition {
            request = request.query(&[("partition", partition)]);
        }
        let response = request.send().await?;
        read_statement(response).await
    }

    async fn collect(&self, first: StatementResponse) -> Result<ResultSet> {
        let statement_handle = first.statement_handle.clone().unwrap_or_default();
        let meta = first.result_set_meta_data.unwrap_or_default();
        let columns = meta.row_type.into_iter().map(|c| c.name).collect();
        let mut rows: Vec<Vec<Option<String>>> =
            first.data.into_iter().map(convert_row).collect();

        for partition in 1..meta.partition_info.len() {
            match self.status(&statement_handle, Some(partition)).await? {
                Poll::Done(resp) => rows.extend(resp.data.into_iter().map(convert_row)),
                Poll::Running(_) => {
                    warn!(statement_handle = %statement_handle, partition, "Partition not ready");
                    return Err(ClientError::ParseError(format!(
                        "partition {} of statement {} is not available",
                        partition, statement_handle
                    )));
                }
            }
        }

        debug!(
            statement_handle = %statement_handle,
            rows = rows.len(),
            partitions = meta.partition_info.len().max(1),
            "Statement finished"
        );

        Ok(ResultSet {
            statement_handle,
            columns,
            rows,
        })
    }
}

async fn read_statement(response: reqwest::Response) -> Result<Poll> {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if status == StatusCode::OK || status == StatusCode::ACCEPTED {
        let parsed: StatementResponse = if text.trim().is_empty() {
            StatementResponse::default()
        } else {
            serde_json::from_str(&text).map_err(|e| {
                ClientError::ParseError(format!("Failed to parse JSON response: {}", e))
            })?
        };
        return Ok(if status == StatusCode::ACCEPTED {
            Poll::Running(parsed)
        } else {
            Poll::Done(parsed)
        });
    }

    // Query errors come back as JSON with a Snowflake error code
    let message = match serde_json::from_str::<StatementResponse>(&text) {
        Ok(StatementResponse {
            message: Some(message),
            code,
            ..
        }) => match code {
            Some(code) => format!("{} ({})", message, code),
            None => message,
        },
        _ => text,
    };
    Err(ClientError::api_error(status.as_u16(), message))
}

fn convert_row(row: Vec<serde_json::Value>) -> Vec<Option<String>> {
    row.into_iter()
        .map(|value| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> SnowflakeConfig {
        SnowflakeConfig {
            account_url: server.uri(),
            token: "secret-token".to_string(),
            token_type: "OAUTH".to_string(),
            database: Some("ANALYTICS".to_string()),
            schema: Some("FINANCE".to_string()),
            warehouse: None,
            role: None,
            statement_timeout_secs: 60,
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_execute_inline_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .and(header("authorization", "Bearer secret-token"))
            .and(header("x-snowflake-authorization-token-type", "OAUTH"))
            .and(body_partial_json(json!({
                "statement": "SELECT 1 AS ONE",
                "database": "ANALYTICS",
                "schema": "FINANCE",
                "timeout": 60
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statementHandle": "01b2-0000",
                "resultSetMetaData": {
                    "numRows": 1,
                    "rowType": [{"name": "ONE", "type": "fixed"}],
                    "partitionInfo": [{"rowCount": 1}]
                },
                "data": [["1"]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SnowflakeClient::new(config(&server));
        let result = client.execute("SELECT 1 AS ONE").await.unwrap();

        assert_eq!(result.statement_handle, "01b2-0000");
        assert_eq!(result.columns, vec!["ONE"]);
        assert_eq!(result.value(0, "one"), Some("1"));
    }

    #[tokio::test]
    async fn test_execute_polls_and_fetches_partitions() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v2/statements"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "code": "333334",
                "message": "Asynchronous execution in progress.",
                "statementHandle": "abc"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/statements/abc"))
            .and(query_param("partition", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [["A-2", null]]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v2/statements/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "statementHandle": "abc",
                "resultSetMetaData": {
                    "rowType": [{"name": "ACCOUNT_ID"}, {"name": "BALANCE"}],
                    "partitionInfo": [{"rowCount": 1}, {"rowCount": 1}]
                },
                "data": [["A-1", "10.00"]]
            })))
            .mount(&server)
            .await;

        let client = SnowflakeClient::new(config(&server));
        let result = client.execute("SELECT * FROM T").await.unwrap();

        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0], vec![Some("A-1".to_string()), Some("10.00".to_string())]);
        assert_eq!(result.rows[1], vec![Some("A-2".to_string()), None]);
    }

    #[tokio::test]
    async fn test_query_error_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": "003001",
                "message": "SQL access control error: Insufficient privileges to operate on schema 'FINANCE'",
                "sqlState": "42501"
            })))
            .mount(&server)
            .await;

        let client = SnowflakeClient::new(config(&server));
        let err = client.execute("CREATE TABLE X (A INT)").await.unwrap_err();

        assert_eq!(err.status(), Some(422));
        assert!(err.to_string().contains("Insufficient privileges"));
        assert!(err.to_string().contains("003001"));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&server)
            .await;

        let client = SnowflakeClient::new(config(&server));
        let err = client.execute("SELECT 1").await.unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = SnowflakeConfig {
            account_url: "https://acme.snowflakecomputing.com".to_string(),
            token: "super-secret".to_string(),
            token_type: "OAUTH".to_string(),
            database: None,
            schema: None,
            warehouse: None,
            role: None,
            statement_timeout_secs: 60,
            poll_interval: Duration::from_secs(1),
        };
        assert!(!format!("{:?}", cfg).contains("super-secret"));
    }
}
