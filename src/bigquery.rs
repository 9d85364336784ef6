use reqwest::blocking::Client as HttpClient;
use reqwest::{header, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::credentials::Credentials;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("request to BigQuery failed")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery returned {status}: {message}")]
    Service { status: StatusCode, message: String },

    #[error("query did not finish within {timeout_ms}ms")]
    Incomplete { timeout_ms: u64 },

    #[error(
        "no Google credentials found; set GOOGLE_APPLICATION_CREDENTIALS or run `gcloud auth application-default login`"
    )]
    Credentials,
}

/// Body of a `jobs.query` call.
#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    pub timeout_ms: u64,
}

impl QueryRequest {
    pub fn legacy(query: &str, timeout_ms: u64) -> Self {
        Self {
            query: query.to_string(),
            use_legacy_sql: true,
            timeout_ms,
        }
    }
}

#[derive(Deserialize, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    pub total_rows: Option<String>,
    pub schema: Option<Schema>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl QueryResponse {
    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .iter()
            .flat_map(|schema| &schema.fields)
            .map(|field| field.name.as_str())
            .collect()
    }
}

#[derive(Deserialize, PartialEq, Debug)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Deserialize, PartialEq, Debug)]
pub struct Field {
    pub name: String,
}

#[derive(Deserialize, PartialEq, Debug)]
pub struct Row {
    pub f: Vec<Cell>,
}

#[derive(Deserialize, PartialEq, Debug)]
pub struct Cell {
    pub v: Value,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    status: Option<String>,
}

/// Fields of one row joined with tabs. `null` becomes an empty field.
pub fn format_row(row: &Row) -> String {
    row.f
        .iter()
        .map(|cell| match &cell.v {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

/// Pull the human readable part out of a Google API error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) => match error.status {
            Some(status) => format!("{} ({status})", error.message),
            None => error.message,
        },
        Err(_) => body.trim().to_string(),
    }
}

pub struct Client {
    http: HttpClient,
    endpoint: String,
    credentials: Credentials,
}

impl Client {
    pub fn new(endpoint: &str, credentials: Credentials) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn query(
        &self,
        project_id: &str,
        request: &QueryRequest,
    ) -> Result<QueryResponse, QueryError> {
        let url = format!("{}/projects/{}/queries", self.endpoint, project_id);
        debug!("POST {url}");
        let resp = self
            .http
            .request(Method::POST, url)
            .header(header::AUTHORIZATION, self.credentials.bearer())
            .json(request)
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let message = error_message(&resp.text()?);
            error!("Error: {message}");
            return Err(QueryError::Service { status, message });
        }

        let response = resp.json::<QueryResponse>()?;
        if !response.job_complete {
            return Err(QueryError::Incomplete {
                timeout_ms: request.timeout_ms,
            });
        }
        Ok(response)
    }
}
