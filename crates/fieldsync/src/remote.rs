//! Remote API contract.
//!
//! The [`Transport`] trait is the only way fieldsync talks to the network.
//! [`HttpTransport`] is the production implementation; tests substitute their
//! own. [`RemoteClient`] layers the record endpoints on top of a transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::{Config, RemoteConfig};
use crate::error::{Error, Result};
use crate::record::{Capture, PendingRecord};

/// Longest response excerpt kept in a rejection message.
const MAX_ERROR_BODY: usize = 200;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Method name as sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a request with this method only reads.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Head => reqwest::Method::HEAD,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(Error::internal(format!("unsupported HTTP method: {other}"))),
        }
    }
}

/// Whether a request loads a whole page or fetches data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Full-page navigation.
    Navigate,
    /// Any other request.
    #[default]
    Other,
}

/// An outbound request, relative to the remote base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<String>,
    /// Navigation or data request.
    pub mode: RequestMode,
}

impl HttpRequest {
    /// A data GET.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            mode: RequestMode::Other,
        }
    }

    /// A page navigation.
    #[must_use]
    pub fn navigate(path: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(path)
        }
    }

    /// A JSON POST.
    #[must_use]
    pub fn post_json(path: impl Into<String>, body: &Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body.to_string()),
            mode: RequestMode::Other,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of a header, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The path without its query string.
    #[must_use]
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// A response from the remote or from a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type` header.
    pub content_type: Option<String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A JSON response.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        }
    }

    /// A plain-text response.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            body: body.into().into_bytes(),
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the body is declared as JSON.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("json"))
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as text, lossily decoded.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends requests to the remote.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Perform one request.
    ///
    /// Any HTTP response, whatever its status, is `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if no response was received.
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Production transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.remote.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let url = self.url(&request.path);
        trace!(method = %request.method, %url, "Sending request");

        let mut builder = self.client.request(request.method.to_reqwest(), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(format!("{url}: reading body: {e}")))?
            .to_vec();

        debug!(method = %request.method, %url, status, "Received response");
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Record endpoints of the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Single attendance record.
    AttendanceSubmit,
    /// Single logbook entry.
    LogbookSubmit,
    /// Single assessment result.
    AssessmentQuickSave,
    /// Batch of assessment results.
    AssessmentBulkSync,
    /// Evidence for an assessment result.
    AssessmentEvidence,
}

impl Endpoint {
    /// Request path.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::AttendanceSubmit => "/attendance/submit",
            Self::LogbookSubmit => "/logbook/submit",
            Self::AssessmentQuickSave => "/assessments/quick-save",
            Self::AssessmentBulkSync => "/assessments/bulk-sync",
            Self::AssessmentEvidence => "/assessments/evidence",
        }
    }
}

/// Per-record outcome in a bulk response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    /// Offline id of the submitted record. Outcomes without one cannot be
    /// matched and are treated as accepted.
    #[serde(default, alias = "offline_id")]
    pub offline_id: Option<String>,
    /// Whether the remote accepted it.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Id the remote assigned.
    #[serde(default, alias = "result_id")]
    pub result_id: Option<i64>,
    /// Why it was refused.
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A conflict reported by the bulk endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkConflict {
    /// Offline id of the conflicting record.
    #[serde(default, alias = "offline_id")]
    pub offline_id: Option<String>,
    /// The `id` sent with the bulk item, i.e. the local record id. Unlike
    /// [`BulkItemResult::result_id`] this is not a remote id.
    #[serde(default, alias = "id")]
    pub result_id: Option<i64>,
    /// What the remote holds.
    #[serde(default, alias = "server_result")]
    pub server_value: Option<Value>,
    /// What the remote received.
    #[serde(default, alias = "client_result")]
    pub client_value: Option<Value>,
}

/// Response of the bulk endpoint. Both lists are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSyncResponse {
    /// Per-record outcomes.
    pub results: Vec<BulkItemResult>,
    /// Reported conflicts.
    pub conflicts: Vec<BulkConflict>,
}

/// Client for the record endpoints.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    csrf_header: String,
    csrf_token: Option<String>,
    device_id: Option<String>,
}

impl RemoteClient {
    /// Create a client over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: &RemoteConfig) -> Self {
        Self {
            transport,
            csrf_header: config.csrf_header.clone(),
            csrf_token: config.csrf_token.clone(),
            device_id: config.device_id.clone(),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Add the CSRF header unless the request already carries one.
    pub fn authorize(&self, request: &mut HttpRequest) {
        if let Some(token) = &self.csrf_token {
            if request.header(&self.csrf_header).is_none() {
                request
                    .headers
                    .push((self.csrf_header.clone(), token.clone()));
            }
        }
    }

    async fn post(&self, endpoint: Endpoint, body: &Value) -> Result<HttpResponse> {
        let mut request = HttpRequest::post_json(endpoint.path(), body)
            .with_header("Accept", "application/json");
        self.authorize(&mut request);

        let response = self.transport.fetch(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            let mut message = response.body_text();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            Err(Error::rejected(response.status, message))
        }
    }

    /// Submit one capture to its endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the remote is unreachable or
    /// [`Error::RemoteRejected`] for a non-2xx answer.
    pub async fn submit(&self, capture: &Capture) -> Result<HttpResponse> {
        let endpoint = capture.kind().endpoint();
        debug!(kind = %capture.kind(), offline_id = %capture.offline_id, "Submitting {}", endpoint.path());
        self.post(endpoint, &capture.wire_body()?).await
    }

    /// Submit assessment results in one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the remote is unreachable or
    /// [`Error::RemoteRejected`] for a non-2xx answer. A 2xx body that does
    /// not decode is logged and read as "all accepted".
    pub async fn bulk_sync(&self, records: &[PendingRecord]) -> Result<BulkSyncResponse> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let mut item = record.capture.wire_body()?;
            if let Value::Object(map) = &mut item {
                map.insert("id".to_string(), Value::from(record.id));
                map.insert(
                    "offline_id".to_string(),
                    Value::String(record.capture.offline_id.to_string()),
                );
            }
            results.push(item);
        }

        let mut body = serde_json::json!({ "results": results });
        if let (Some(device_id), Value::Object(map)) = (&self.device_id, &mut body) {
            map.insert("deviceId".to_string(), Value::String(device_id.clone()));
        }

        let response = self.post(Endpoint::AssessmentBulkSync, &body).await?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(BulkSyncResponse::default());
        }
        match response.body_json() {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(status = response.status, "Undecodable bulk sync response, treating batch as accepted: {e}");
                Ok(BulkSyncResponse::default())
            }
        }
    }
}
