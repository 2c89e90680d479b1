//! Client for the remote school data service.
//!
//! `RemoteDataService` is the seam the engine fetches through; `HttpDataService`
//! is the production implementation over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::ApiError;
use crate::cache::Credential;
use crate::models::Partition;

/// Read access to one page of one partition.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Fetch a page of `partition` for `scope`. The raw response body is
    /// returned; envelope normalization happens in the loader.
    async fn fetch_page(
        &self,
        partition: Partition,
        scope: &str,
        credential: &Credential,
        page: u32,
        limit: u32,
    ) -> Result<Value, ApiError>;
}

/// Path of each partition's endpoint relative to the base URL.
pub fn endpoint_path(partition: Partition) -> &'static str {
    match partition {
        Partition::Members => "students",
        Partition::Groups => "classes",
        Partition::AttendanceToday => "attendance/today",
        Partition::AttendanceWeekly => "attendance/weekly",
        Partition::Deliveries => "deliveries",
        Partition::CalendarEvents => "calendar/events",
        Partition::MenuOfDay => "menu/today",
    }
}

/// HTTP implementation of `RemoteDataService`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpDataService {
    client: Client,
    base_url: String,
}

impl HttpDataService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, partition: Partition) -> String {
        format!("{}/{}", self.base_url, endpoint_path(partition))
    }

    /// Read a response body, classifying non-success statuses.
    async fn read_body(response: reqwest::Response) -> Result<String, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl RemoteDataService for HttpDataService {
    async fn fetch_page(
        &self,
        partition: Partition,
        scope: &str,
        credential: &Credential,
        page: u32,
        limit: u32,
    ) -> Result<Value, ApiError> {
        let url = self.url_for(partition);
        debug!(%partition, scope, page, limit, "GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(credential.secret())
            .query(&[
                ("scope", scope.to_string()),
                ("page", page.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let text = Self::read_body(response).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("{} body is not JSON: {}", partition, e))
        })
    }
}
