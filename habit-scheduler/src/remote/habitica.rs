use super::{NewRemoteItem, RemoteError, RemoteItem, RemoteTracker};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://habitica.com/api/v3";
const TASKS_PATH: &str = "/tasks/user";
/// Completed to-dos are only listed when asked for by type.
const COMPLETED_TODOS: &str = "completedTodos";

/// Connection settings for the Habitica API.
#[derive(Clone)]
pub struct HabiticaConfig {
    base_url: String,
    user_id: String,
    api_token: String,
    timeout: Duration,
}

impl HabiticaConfig {
    pub fn new(user_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: user_id.into(),
            api_token: api_token.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Upper bound for a single request, connect through body.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Responses arrive either wrapped as `{"data": ...}` or bare.
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload<T> {
    Envelope { data: T },
    Bare(T),
}

impl<T> Payload<T> {
    fn into_inner(self) -> T {
        match self {
            Payload::Envelope { data } => data,
            Payload::Bare(data) => data,
        }
    }
}

/// [`RemoteTracker`] backed by the Habitica REST API.
pub struct HabiticaClient {
    config: HabiticaConfig,
    client: reqwest::Client,
}

impl HabiticaClient {
    pub fn new(config: HabiticaConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn tasks_url(&self) -> String {
        format!("{}{}", self.config.base_url, TASKS_PATH)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = request
            .header("x-api-user", &self.config.user_id)
            .header("x-api-key", &self.config.api_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Payload<T> = serde_json::from_str(&body)?;
        Ok(payload.into_inner())
    }
}

#[async_trait]
impl RemoteTracker for HabiticaClient {
    #[tracing::instrument(skip(self, item), fields(text = %item.text))]
    async fn create_item(&self, item: &NewRemoteItem) -> Result<RemoteItem, RemoteError> {
        let created: RemoteItem = self
            .send(self.client.post(self.tasks_url()).json(item))
            .await?;
        tracing::debug!(remote_id = %created.id, "Created remote item");
        Ok(created)
    }

    /// Fetches the active items and the completed to-dos, and returns them as one list.
    ///
    /// An item present in both lists is reported once, in its completed form.
    #[tracing::instrument(skip(self))]
    async fn fetch_items(&self) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut items: Vec<RemoteItem> = self.send(self.client.get(self.tasks_url())).await?;
        let completed: Vec<RemoteItem> = self
            .send(
                self.client
                    .get(self.tasks_url())
                    .query(&[("type", COMPLETED_TODOS)]),
            )
            .await?;

        let completed_ids: HashSet<&str> = completed.iter().map(|item| item.id.as_str()).collect();
        items.retain(|item| !completed_ids.contains(item.id.as_str()));
        items.extend(completed);

        tracing::debug!("Fetched {} remote items", items.len());
        Ok(items)
    }
}
