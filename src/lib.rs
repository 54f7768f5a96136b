// src/lib.rs
use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod config;
pub mod credential;
pub mod flag;
pub mod probes;
pub mod report;
pub mod store;
pub mod stress;
pub mod verifier;
mod tests;

pub use crate::config::Config;
pub use crate::credential::{AdminCredentialResolver, CredentialProvider, StaticCredential};
pub use crate::probes::{is_safe_input, is_safe_input_with, Probes};
pub use crate::report::{Outcome, Report};
pub use crate::store::{FlagStore, MemoryStore};
pub use crate::verifier::{UnauthorizedPolicy, Verifier};

const BODY_EXCERPT: usize = 200;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Malformed JSON from {endpoint}: {source}")]
    DecodeError {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected status {status} from {endpoint}: {body}")]
    StatusError {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Contract violation: {0}")]
    Violation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    CredentialError(String),
}

/// Status and raw body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub endpoint: String,
    pub status: StatusCode,
    pub body: String,
}

impl ApiReply {
    pub fn code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ContractError> {
        serde_json::from_str(&self.body).map_err(|source| ContractError::DecodeError {
            endpoint: self.endpoint.clone(),
            source,
        })
    }

    /// Fails with `StatusError` unless the status is one of `allowed`.
    pub fn expect_status(&self, allowed: &[u16]) -> Result<&Self, ContractError> {
        if allowed.contains(&self.code()) {
            Ok(self)
        } else {
            Err(self.status_error())
        }
    }

    pub fn status_error(&self) -> ContractError {
        ContractError::StatusError {
            endpoint: self.endpoint.clone(),
            status: self.code(),
            body: self.excerpt(),
        }
    }

    pub fn excerpt(&self) -> String {
        self.body.chars().take(BODY_EXCERPT).collect()
    }
}

/// HTTP session against the server under test. Cheap to clone; clones share
/// one connection pool.
#[derive(Clone)]
pub struct Client {
    base_url: Url,
    api_prefix: Vec<String>,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn debug_info(&self) -> String {
        format!(
            "Client {{ base_url: {}, api_prefix: /{}, timeout: {:?} }}",
            self.base_url,
            self.api_prefix.join("/"),
            self.timeout
        )
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url, ContractError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ContractError::Config(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, ContractError> {
        let mut all: Vec<&str> = self.api_prefix.iter().map(String::as_str).collect();
        all.extend_from_slice(segments);
        self.url(&all)
    }

    fn headers(token: Option<&str>) -> Result<HeaderMap, ContractError> {
        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static("Flags-Contract"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ContractError::CredentialError("token is not a valid header value".to_string()))?;
            headers.insert("Authorization", value);
        }
        Ok(headers)
    }

    async fn send(&self, request: reqwest::RequestBuilder, endpoint: String) -> Result<ApiReply, ContractError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("{} -> {}", endpoint, status);
        Ok(ApiReply { endpoint, status, body })
    }

    async fn get(&self, url: Url, token: Option<&str>) -> Result<ApiReply, ContractError> {
        let endpoint = format!("GET {}", url.path());
        let request = self.http_client.get(url).headers(Self::headers(token)?);
        self.send(request, endpoint).await
    }

    async fn write<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: &B,
        token: Option<&str>,
    ) -> Result<ApiReply, ContractError> {
        let endpoint = format!("{} {}", method, url.path());
        let request = self
            .http_client
            .request(method, url)
            .headers(Self::headers(token)?)
            .json(body);
        self.send(request, endpoint).await
    }

    pub async fn health(&self) -> Result<ApiReply, ContractError> {
        self.get(self.url(&["health"])?, None).await
    }

    pub async fn list_events(&self) -> Result<ApiReply, ContractError> {
        self.get(self.api_url(&["events"])?, None).await
    }

    pub async fn get_event(&self, id: &str) -> Result<ApiReply, ContractError> {
        self.get(self.api_url(&["events", id])?, None).await
    }

    pub async fn list_flags(&self) -> Result<ApiReply, ContractError> {
        self.get(self.api_url(&["feature-flags"])?, None).await
    }

    pub async fn get_flag(&self, key: &str) -> Result<ApiReply, ContractError> {
        self.get(self.api_url(&["feature-flags", key])?, None).await
    }

    pub async fn put_flag(
        &self,
        key: &str,
        update: &flag::UpdateRequest,
        token: Option<&str>,
    ) -> Result<ApiReply, ContractError> {
        self.put_flag_raw(key, update, token).await
    }

    /// PUT with an arbitrary body, for payloads the typed request cannot express.
    pub async fn put_flag_raw<B: Serialize + ?Sized>(
        &self,
        key: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<ApiReply, ContractError> {
        let url = self.api_url(&["feature-flags", key])?;
        self.write(reqwest::Method::PUT, url, body, token).await
    }

    pub async fn get_profile(&self, token: Option<&str>) -> Result<ApiReply, ContractError> {
        self.get(self.api_url(&["users", "profile"])?, token).await
    }

    pub async fn put_profile(
        &self,
        body: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<ApiReply, ContractError> {
        let url = self.api_url(&["users", "profile"])?;
        self.write(reqwest::Method::PUT, url, body, token).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<ApiReply, ContractError> {
        let url = self.api_url(&["users", "login"])?;
        let body = serde_json::json!({ "email": email, "password": password });
        self.write(reqwest::Method::POST, url, &body, None).await
    }

    /// Typed list read; anything but 200 is an error.
    pub async fn flags(&self) -> Result<flag::FlagList, ContractError> {
        let reply = self.list_flags().await?;
        reply.expect_status(&[200])?;
        reply.json()
    }

    /// Typed single read; `None` on 404.
    pub async fn flag(&self, key: &str) -> Result<Option<flag::FeatureFlag>, ContractError> {
        let reply = self.get_flag(key).await?;
        match reply.code() {
            200 => Ok(Some(reply.json::<flag::FlagEnvelope>()?.into_flag())),
            404 => Ok(None),
            _ => Err(reply.status_error()),
        }
    }
}

pub struct ClientBuilder {
    base_url: String,
    api_prefix: String,
    timeout: Duration,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            base_url: config::DEFAULT_BASE_URL.to_string(),
            api_prefix: config::DEFAULT_API_PREFIX.to_string(),
            timeout: Duration::from_secs(config::DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.with_base_url(&config.base_url)
            .with_api_prefix(&config.api_prefix)
            .with_timeout(config.timeout)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_api_prefix(mut self, api_prefix: &str) -> Self {
        self.api_prefix = api_prefix.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Client, ContractError> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| ContractError::Config(format!("invalid base URL {}: {}", self.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ContractError::Config(format!("{} cannot be a base URL", self.base_url)));
        }

        let api_prefix = self
            .api_prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let http_client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()?;

        Ok(Client {
            base_url,
            api_prefix,
            http_client,
            timeout: self.timeout,
        })
    }
}
