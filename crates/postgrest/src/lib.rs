//! Row-storage REST client for the academy portal
//!
//! This crate wraps the PostgREST endpoint of the hosted database.
//!
//! # Features
//!
//! - `select` with `eq` and `in` filters
//! - Ordering and limits
//! - `insert` returning the stored representation
//! - Exact row counts through `Content-Range`

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Postgres error code for unique constraint violations
pub const UNIQUE_VIOLATION: &str = "23505";

/// Details of a PostgREST API error
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Error type
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: reqwest::StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError {
        message: String,
        status: reqwest::StatusCode,
    },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PostgrestError {
    /// Postgres error code, when the server sent one
    pub fn code(&self) -> Option<&str> {
        match self {
            PostgrestError::ApiError { details, .. } => details.code.as_deref(),
            _ => None,
        }
    }

    /// Human readable message from the server, falling back to the error text
    pub fn message(&self) -> String {
        match self {
            PostgrestError::ApiError { details, .. } => details
                .message
                .clone()
                .unwrap_or_else(|| details.to_string()),
            PostgrestError::UnparsedApiError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// PostgREST client for one table
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
}

impl PostgrestClient {
    /// Create a client for `table`
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(api_key) {
            Ok(value) => {
                headers.insert("apikey", value);
            }
            Err(_) => warn!("api key is not a valid header value; sending without it"),
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: Vec::new(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value: {}", value))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Send the signed-in user's token so row-level policies apply
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    /// Columns to return
    pub fn select(mut self, columns: &str) -> Self {
        self.query_params.retain(|(key, _)| key != "select");
        self.query_params
            .push(("select".to_string(), columns.to_string()));
        self
    }

    /// Equality filter
    pub fn eq(self, column: &str, value: &str) -> Self {
        self.filter(column, format!("eq.{}", value))
    }

    /// Membership filter
    pub fn in_list(self, column: &str, values: &[&str]) -> Self {
        let values: Vec<String> = values.iter().map(|v| quote_list_value(v)).collect();
        self.filter(column, format!("in.({})", values.join(",")))
    }

    /// Sort by a column
    pub fn order(mut self, column: &str, order: SortOrder) -> Self {
        let order_str = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        self.query_params.retain(|(key, _)| key != "order");
        self.query_params
            .push(("order".to_string(), format!("{}.{}", column, order_str)));
        self
    }

    /// Limit the number of rows
    pub fn limit(mut self, count: usize) -> Self {
        self.query_params.retain(|(key, _)| key != "limit");
        self.query_params
            .push(("limit".to_string(), count.to_string()));
        self
    }

    fn filter(mut self, column: &str, expression: String) -> Self {
        self.query_params.push((column.to_string(), expression));
        self
    }

    fn build_url(&self) -> Result<String, PostgrestError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, self.table))?;

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }

    /// Fetch rows
    pub async fn execute<T: for<'de> Deserialize<'de>>(&self) -> Result<Vec<T>, PostgrestError> {
        let url = self.build_url()?;
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let response = check(response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Insert rows and return what the server stored
    pub async fn insert<T: Serialize>(&self, values: T) -> Result<Value, PostgrestError> {
        let url = self.build_url()?;
        debug!("POST {}", url);

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("return=representation"),
        );

        let response = self
            .http_client
            .post(&url)
            .headers(headers)
            .json(&values)
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let response = check(response).await?;
        let body_text = response.text().await.map_err(|e| {
            PostgrestError::DeserializationError(format!("Failed to read response body: {}", e))
        })?;

        if body_text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str::<Value>(&body_text)
                .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
        }
    }

    /// Exact number of rows matching the filters
    pub async fn count(&self) -> Result<u64, PostgrestError> {
        let url = self.build_url()?;
        debug!("HEAD {}", url);

        let mut headers = self.headers.clone();
        headers.insert(
            HeaderName::from_static("prefer"),
            HeaderValue::from_static("count=exact"),
        );

        let response = self
            .http_client
            .head(&url)
            .headers(headers)
            .send()
            .await
            .map_err(PostgrestError::NetworkError)?;

        let response = check(response).await?;
        let range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                PostgrestError::DeserializationError("missing Content-Range header".to_string())
            })?;

        parse_content_range_total(range).ok_or_else(|| {
            PostgrestError::DeserializationError(format!("invalid Content-Range: {}", range))
        })
    }
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`
pub fn parse_content_range_total(range: &str) -> Option<u64> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

fn quote_list_value(value: &str) -> String {
    if value
        .chars()
        .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\' | ' '))
    {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

async fn check(response: Response) -> Result<Response, PostgrestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());

    match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
        Ok(details) => Err(PostgrestError::ApiError { details, status }),
        Err(_) => Err(PostgrestError::UnparsedApiError {
            message: error_text,
            status,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_select_with_filters() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/courses"))
            .and(query_param("select", "*"))
            .and(query_param("instructor_id", "eq.inst-1"))
            .and(query_param("order", "created_at.desc"))
            .and(header("authorization", "Bearer user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "c2", "title": "Rust" },
                { "id": "c1", "title": "Python" }
            ])))
            .mount(&mock_server)
            .await;

        let rows = PostgrestClient::new(&mock_server.uri(), "fake-key", "courses", Client::new())
            .with_auth("user-token")
            .unwrap()
            .select("*")
            .eq("instructor_id", "inst-1")
            .order("created_at", SortOrder::Descending)
            .execute::<Value>()
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "Rust");
    }

    #[tokio::test]
    async fn test_in_list_filter() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/courses"))
            .and(query_param("id", "in.(c1,c2)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "c1" }])))
            .mount(&mock_server)
            .await;

        let rows = PostgrestClient::new(&mock_server.uri(), "fake-key", "courses", Client::new())
            .select("*")
            .in_list("id", &["c1", "c2"])
            .execute::<Value>()
            .await
            .unwrap();

        assert_eq!(rows, vec![json!({ "id": "c1" })]);
    }

    #[test]
    fn test_list_values_are_quoted_when_needed() {
        assert_eq!(quote_list_value("plain"), "plain");
        assert_eq!(quote_list_value("a,b"), "\"a,b\"");
        assert_eq!(quote_list_value("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[tokio::test]
    async fn test_insert() {
        let mock_server = MockServer::start().await;

        let insert_data = json!({ "student_id": "s1", "course_id": "c1", "progress": 0 });
        let expected_response = json!([{ "id": "e1", "student_id": "s1", "course_id": "c1", "progress": 0 }]);

        Mock::given(method("POST"))
            .and(path("/rest/v1/enrollments"))
            .and(header("apikey", "fake-key"))
            .and(header("content-type", "application/json"))
            .and(header("Prefer", "return=representation"))
            .and(body_json(&insert_data))
            .respond_with(ResponseTemplate::new(201).set_body_json(&expected_response))
            .mount(&mock_server)
            .await;

        let client =
            PostgrestClient::new(&mock_server.uri(), "fake-key", "enrollments", Client::new());
        let data = client.insert(&insert_data).await.unwrap();

        assert_eq!(data, expected_response);
    }

    #[tokio::test]
    async fn test_count() {
        let mock_server = MockServer::start().await;

        Mock::given(method("HEAD"))
            .and(path("/rest/v1/enrollments"))
            .and(query_param("course_id", "eq.c1"))
            .and(header("prefer", "count=exact"))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", "0-2/3"))
            .mount(&mock_server)
            .await;

        let count = PostgrestClient::new(&mock_server.uri(), "fake-key", "enrollments", Client::new())
            .select("*")
            .eq("course_id", "c1")
            .count()
            .await
            .unwrap();

        assert_eq!(count, 3);
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mock_server = MockServer::start().await;

        let duplicate = json!({ "student_id": "s1", "course_id": "c1", "progress": 0 });
        Mock::given(method("POST"))
            .and(path("/rest/v1/enrollments"))
            .and(body_json(&duplicate))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"enrollments_student_id_course_id_key\"",
                "details": null,
                "hint": null
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/server_error"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let err = PostgrestClient::new(&mock_server.uri(), "fake-key", "enrollments", Client::new())
            .insert(&duplicate)
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(err.message().contains("duplicate key"));

        let err = PostgrestClient::new(&mock_server.uri(), "fake-key", "server_error", Client::new())
            .select("*")
            .execute::<Value>()
            .await
            .unwrap_err();
        match err {
            PostgrestError::UnparsedApiError { message, status } => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(message, "Internal Server Error");
            }
            e => panic!("Expected UnparsedApiError for 500, got {:?}", e),
        }
    }
}
