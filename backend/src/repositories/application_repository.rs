use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::config::app_config::SupabaseConfig;
use crate::models::application_models::{ApplicationId, ApplicationRecord, NewApplication};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to the hosted table failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hosted table rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("hosted table returned no row")]
    EmptyResponse,
    #[error("invalid table endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Where submitted applications end up. Rows are write-once: there is no
/// update or delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError>;

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError>;

    fn describe(&self) -> &'static str;
}

/// PostgREST access to a Supabase table using the service-role key.
pub struct SupabaseStore {
    client: Client,
    endpoint: Url,
    service_role_key: String,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseConfig) -> Result<Self, StoreError> {
        let mut base = config.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(&format!("rest/v1/{}", config.table))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            service_role_key: config.service_role_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn rows(response: reqwest::Response) -> Result<Vec<ApplicationRecord>, StoreError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Vec<ApplicationRecord>>().await?)
    }
}

#[async_trait]
impl ApplicationStore for SupabaseStore {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("prefer", "return=representation")
            .json(&[&application])
            .send()
            .await?;

        let mut rows = Self::rows(response).await?;
        if rows.is_empty() {
            return Err(StoreError::EmptyResponse);
        }
        Ok(rows.swap_remove(0))
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_string())])
            .send()
            .await?;

        Ok(Self::rows(response).await?.into_iter().next())
    }

    fn describe(&self) -> &'static str {
        "supabase"
    }
}

/// Keeps applications in process memory. Used in development when no
/// Supabase project is configured, and by tests.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<Vec<ApplicationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn insert(&self, application: NewApplication) -> Result<ApplicationRecord, StoreError> {
        let record = ApplicationRecord {
            id: ApplicationId::Text(Uuid::new_v4().to_string()),
            application,
            created_at: Some(Utc::now()),
        };
        self.rows.lock().await.push(record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: &ApplicationId) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|row| &row.id == id)
            .cloned())
    }

    fn describe(&self) -> &'static str {
        "in-memory"
    }
}
