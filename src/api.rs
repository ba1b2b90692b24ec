use std::collections::BTreeMap;
use std::fmt;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Duration;

use crate::error::FetchError;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:5001/api";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    BitcoinHistorical,
    BitcoinAnalysis,
    EtfData,
    RiskMetrics,
    Health,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::BitcoinHistorical => "bitcoin/historical",
            Resource::BitcoinAnalysis => "bitcoin/analysis",
            Resource::EtfData => "etf/data",
            Resource::RiskMetrics => "risk/metrics",
            Resource::Health => "health",
        }
    }
}

/// Identity of a remote query. Two keys that compare equal are the same
/// logical request and share one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    resource: Resource,
    params: BTreeMap<String, String>,
}

impl EndpointKey {
    pub fn new(resource: Resource) -> Self {
        EndpointKey {
            resource,
            params: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[cfg(test)]
    pub fn resource(&self) -> Resource {
        self.resource
    }

    fn query_string(&self) -> Result<Option<String>, FetchError> {
        if self.params.is_empty() {
            return Ok(None);
        }
        serde_urlencoded::to_string(&self.params)
            .map(Some)
            .map_err(|err| {
                FetchError::precondition(format!(
                    "cannot encode query for {}: {err}",
                    self.resource.path()
                ))
            })
    }

    pub fn url(&self, base: &str) -> Result<String, FetchError> {
        let base = base.trim_end_matches('/');
        let mut url = format!("{base}/{}", self.resource.path());
        if let Some(query) = self.query_string()? {
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.resource.path())?;
        if let Ok(Some(query)) = self.query_string() {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

/// Where the query cache gets its payloads from.
pub trait DataSource: Send + Sync + 'static {
    fn fetch(&self, key: &EndpointKey) -> BoxFuture<'static, Result<Value, FetchError>>;
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ApiClient {
    pub fn new(base: &str) -> Result<ApiClient, anyhow::Error> {
        let trimmed = base.trim().trim_end_matches('/');
        let base = if trimmed.is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            trimmed.to_string()
        };
        Ok(ApiClient {
            client: build_http_client()?,
            base,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn get(&self, key: &EndpointKey) -> Result<Value, FetchError> {
        let url = key.url(&self.base)?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| FetchError::from_transport(&err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::from_transport(&err))?;
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        let value: Value = serde_json::from_slice(&body)?;
        check_envelope(value)
    }

    pub async fn check_health(&self) -> Result<HealthReport, FetchError> {
        let value = self.get(&EndpointKey::new(Resource::Health)).await?;
        serde_json::from_value(value)
            .map_err(|err| FetchError::malformed(format!("health report: {err}")))
    }
}

impl DataSource for ApiClient {
    fn fetch(&self, key: &EndpointKey) -> BoxFuture<'static, Result<Value, FetchError>> {
        let client = self.clone();
        let key = key.clone();
        async move { client.get(&key).await }.boxed()
    }
}

fn error_detail(body: &[u8]) -> Option<String> {
    let envelope = serde_json::from_slice::<ErrorEnvelope>(body).ok()?;
    if let Some(error) = envelope.error {
        return Some(error);
    }
    match envelope.detail? {
        Value::String(detail) => Some(detail),
        other => Some(other.to_string()),
    }
}

fn check_envelope(value: Value) -> Result<Value, FetchError> {
    if let Some(Value::Bool(false)) = value.get("success") {
        let reason = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return Err(FetchError::malformed(format!(
            "backend reported failure: {reason}"
        )));
    }
    Ok(value)
}

fn build_http_client() -> Result<Client, anyhow::Error> {
    Ok(ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(20))
        .build()?)
}
