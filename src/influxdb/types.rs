//! Types for InfluxDB query responses.
//!
//! Based on the InfluxDB 1.x `/query` JSON format.

use serde::Deserialize;

/// Top-level `/query` response
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResponse {
    /// First error reported anywhere in the response
    pub fn first_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }

    /// All series of all statements
    pub fn series(&self) -> impl Iterator<Item = &Series> {
        self.results.iter().flat_map(|r| r.series.iter())
    }
}

/// Result of one statement
#[derive(Debug, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One measurement's rows
#[derive(Debug, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl Series {
    /// Sum of a numeric column, ignoring nulls and non-numeric cells
    pub fn sum_column(&self, column: &str) -> u64 {
        let Some(index) = self.columns.iter().position(|c| c == column) else {
            return 0;
        };

        self.values
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(|cell| cell.as_u64().or_else(|| cell.as_f64().map(|f| f.max(0.0) as u64)))
            .sum()
    }

    /// String cells of a column, e.g. the `value` column of `SHOW TAG VALUES`
    pub fn column_strings(&self, column: &str) -> Vec<String> {
        let Some(index) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };

        self.values
            .iter()
            .filter_map(|row| row.get(index))
            .filter_map(|cell| cell.as_str().map(str::to_string))
            .collect()
    }

    /// `time` of the first row, in the epoch unit the query asked for
    pub fn first_time(&self) -> Option<i64> {
        let index = self.columns.iter().position(|c| c == "time")?;
        self.values.first()?.get(index)?.as_i64()
    }
}
