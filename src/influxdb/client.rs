//! HTTP client for the InfluxDB 1.x API.

use super::types::QueryResponse;
use crate::utils::config::InfluxDbConfig;
use crate::utils::error::{DumpError, ReportError};
use log::debug;
use reqwest::blocking::Client;

/// Anything that can answer InfluxQL queries
///
/// Implemented by [`InfluxDbClient`]; the dump command only needs this much.
pub trait QueryClient {
    /// Run one InfluxQL query
    ///
    /// # Errors
    /// * `DumpError` - the request failed or the database reported an error
    fn query(&self, query: &str) -> Result<QueryResponse, DumpError>;
}

/// Client for writing points to and querying an InfluxDB database
pub struct InfluxDbClient {
    client: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

impl InfluxDbClient {
    /// Create a new client
    pub fn new(config: &InfluxDbConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Write a batch of line-protocol points (millisecond precision)
    ///
    /// # Errors
    /// * `ReportError::RequestFailed` - connection or timeout failure
    /// * `ReportError::Rejected` - InfluxDB answered with a non-success status
    pub fn write_lines(&self, body: String) -> Result<(), ReportError> {
        debug!("Writing {} bytes of points to {}", body.len(), self.base_url);

        let response = self
            .client
            .post(format!("{}/write", self.base_url))
            .query(&[("db", self.database.as_str()), ("precision", "ms")])
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        Ok(())
    }

    /// Run an InfluxQL query, timestamps in epoch milliseconds
    ///
    /// # Errors
    /// * `DumpError::RequestFailed` - HTTP failure or undecodable body
    /// * `DumpError::QueryFailed` - InfluxDB reported an error for the query
    pub fn query(&self, query: &str) -> Result<QueryResponse, DumpError> {
        debug!("InfluxQL query: {}", query);

        let response = self
            .client
            .get(format!("{}/query", self.base_url))
            .query(&[("db", self.database.as_str()), ("q", query), ("epoch", "ms")])
            .basic_auth(&self.username, Some(&self.password))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(DumpError::QueryFailed(format!(
                "HTTP {}: {}",
                status,
                response.text().unwrap_or_default()
            )));
        }

        let body: QueryResponse = response.json()?;
        if let Some(error) = body.first_error() {
            return Err(DumpError::QueryFailed(error.to_string()));
        }

        Ok(body)
    }
}

impl QueryClient for InfluxDbClient {
    fn query(&self, query: &str) -> Result<QueryResponse, DumpError> {
        InfluxDbClient::query(self, query)
    }
}
