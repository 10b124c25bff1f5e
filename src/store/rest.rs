//! PostgREST-style HTTP backend (the API Supabase exposes under `/rest/v1`).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::store::traits::{RemoteStore, Table};

/// HTTP client for the remote status tables.
pub struct RestStore {
    base_url: String,
    client: reqwest::Client,
}

impl RestStore {
    /// Build a client authenticated with the configured key.
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let key = config.api_key();
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(key)?);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {key}"))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static("return=minimal"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RemoteError::Request {
                table: "*".to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: format!("{}/rest/v1", config.url),
            client,
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.base_url, table.name())
    }

    async fn check(table: Table, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            table: table.name().to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, RemoteError> {
    HeaderValue::from_str(value).map_err(|e| RemoteError::Request {
        table: "*".to_string(),
        reason: format!("API key is not a valid header value: {e}"),
    })
}

fn request_error(table: Table, e: reqwest::Error) -> RemoteError {
    RemoteError::Request {
        table: table.name().to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(&self, table: Table, key: &str) -> Result<Option<Value>, RemoteError> {
        let column = table.require_key()?;
        let filter = format!("eq.{key}");

        let response = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "id"), (column, filter.as_str())])
            .send()
            .await
            .map_err(|e| request_error(table, e))?;
        let response = Self::check(table, response).await?;

        let rows: Vec<Value> = response.json().await.map_err(|e| request_error(table, e))?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, table: Table, row: &Value) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.table_url(table))
            .json(row)
            .send()
            .await
            .map_err(|e| request_error(table, e))?;
        Self::check(table, response).await?;
        Ok(())
    }

    async fn update(&self, table: Table, key: &str, patch: &Value) -> Result<(), RemoteError> {
        let column = table.require_key()?;
        let filter = format!("eq.{key}");

        let response = self
            .client
            .patch(self.table_url(table))
            .query(&[(column, filter.as_str())])
            .json(patch)
            .send()
            .await
            .map_err(|e| request_error(table, e))?;
        Self::check(table, response).await?;
        Ok(())
    }
}
