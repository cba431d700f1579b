//! HTTP client for the queue gateway.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::QueueGateway;
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::models::{
    ApiResponse, Counter, CounterId, CounterPatch, EntryId, LoginData, NewCounter, NewEntry,
    QueueEntry,
};
use crate::session::SessionStore;

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpGatewayConfig {
    /// Defaults: 3 s connect timeout, 10 s request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Gateway client over reqwest. Cheap to clone.
#[derive(Clone)]
pub struct HttpGateway {
    config: HttpGatewayConfig,
    session: Arc<SessionStore>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn builder(base_url: impl Into<String>) -> HttpGatewayBuilder {
        HttpGatewayBuilder::new(base_url)
    }

    /// Build from the loaded configuration.
    pub fn from_config(config: &QueueConfig, session: Arc<SessionStore>) -> Self {
        HttpGateway::builder(config.gateway_url.clone())
            .session(session)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Issue one request and unwrap the response envelope.
    ///
    /// Non-2xx responses that still carry an envelope surface as
    /// [`QueueError::Gateway`] so the backend's message reaches the operator.
    async fn send<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(token) = self.session.credential() {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        debug!(%method, %url, "gateway request");
        let resp = req.send().await.map_err(|e| QueueError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| QueueError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        let parsed = serde_json::from_slice::<ApiResponse<T>>(&bytes);
        if !status.is_success() {
            return match parsed {
                Ok(envelope) if !envelope.success => envelope.into_result(),
                _ => Err(QueueError::Http { status: status.as_u16(), url }),
            };
        }

        parsed
            .map_err(|e| QueueError::Decode {
                context: path.to_string(),
                detail: e.to_string(),
            })?
            .into_result()
    }

    async fn send_data<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(method, path, body).await?.ok_or_else(|| QueueError::Decode {
            context: path.to_string(),
            detail: "response carried no data".to_string(),
        })
    }

    async fn send_unit<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.send::<B, serde_json::Value>(method, path, body).await.map(|_| ())
    }
}

const NO_BODY: Option<&()> = None;

impl QueueGateway for HttpGateway {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let body = serde_json::json!({ "username": username, "password": password });
        let data: LoginData = self.send_data(Method::POST, "/api/auth/login", Some(&body)).await?;
        Ok(data.token)
    }

    async fn logout(&self) -> Result<()> {
        self.send_unit(Method::POST, "/api/auth/logout", NO_BODY).await
    }

    async fn list_queue(&self, counter: Option<&CounterId>) -> Result<Vec<QueueEntry>> {
        let path = match counter {
            Some(id) => format!("/api/queue?counter_id={id}"),
            None => "/api/queue".to_string(),
        };
        Ok(self.send(Method::GET, &path, NO_BODY).await?.unwrap_or_default())
    }

    async fn add_person(&self, entry: &NewEntry) -> Result<QueueEntry> {
        self.send_data(Method::POST, "/api/queue", Some(entry)).await
    }

    async fn call_next(&self, counter: &CounterId) -> Result<Option<QueueEntry>> {
        self.send(Method::POST, &format!("/api/counters/{counter}/call-next"), NO_BODY).await
    }

    async fn recall(&self, entry: &EntryId) -> Result<()> {
        self.send_unit(Method::POST, &format!("/api/queue/{entry}/recall"), NO_BODY).await
    }

    async fn complete(&self, entry: &EntryId) -> Result<QueueEntry> {
        self.send_data(Method::POST, &format!("/api/queue/{entry}/complete"), NO_BODY).await
    }

    async fn skip(&self, entry: &EntryId) -> Result<QueueEntry> {
        self.send_data(Method::POST, &format!("/api/queue/{entry}/skip"), NO_BODY).await
    }

    async fn remove(&self, entry: &EntryId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/api/queue/{entry}"), NO_BODY).await
    }

    async fn edit_name(&self, entry: &EntryId, name: &str) -> Result<QueueEntry> {
        let body = serde_json::json!({ "name": name });
        self.send_data(Method::PATCH, &format!("/api/queue/{entry}"), Some(&body)).await
    }

    async fn list_counters(&self) -> Result<Vec<Counter>> {
        Ok(self.send(Method::GET, "/api/counters", NO_BODY).await?.unwrap_or_default())
    }

    async fn create_counter(&self, counter: &NewCounter) -> Result<Counter> {
        self.send_data(Method::POST, "/api/counters", Some(counter)).await
    }

    async fn update_counter(&self, id: &CounterId, patch: &CounterPatch) -> Result<Counter> {
        self.send_data(Method::PATCH, &format!("/api/counters/{id}"), Some(patch)).await
    }

    async fn toggle_counter(&self, id: &CounterId, active: bool) -> Result<Counter> {
        let body = serde_json::json!({ "active": active });
        self.send_data(Method::POST, &format!("/api/counters/{id}/toggle"), Some(&body)).await
    }

    async fn delete_counter(&self, id: &CounterId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/api/counters/{id}"), NO_BODY).await
    }
}

/// Builder for [`HttpGateway`].
pub struct HttpGatewayBuilder {
    config: HttpGatewayConfig,
    session: Option<Arc<SessionStore>>,
}

impl HttpGatewayBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { config: HttpGatewayConfig::new(base_url), session: None }
    }

    /// Attach the session whose credential is sent with every request.
    /// Without one an in-memory, unauthenticated store is used.
    pub fn session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> HttpGateway {
        // Fall back to a default client rather than panicking if the builder fails.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();

        HttpGateway {
            config: self.config,
            session: self.session.unwrap_or_else(|| Arc::new(SessionStore::in_memory())),
            client,
        }
    }
}
