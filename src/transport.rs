//! Transport-level request/response types.
//!
//! A `WebhookEvent` is what the webhook classifier consumes, whether the
//! delivery came through the axum server or as an API-Gateway proxy event.

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

/// A single inbound webhook delivery.
#[derive(Debug, Clone, Default)]
pub struct WebhookEvent {
    pub method: String,
    pub path: String,
    /// Header names are stored lowercased.
    pub headers: HashMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookEvent {
    pub fn new(method: impl Into<String>, path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            query: BTreeMap::new(),
            body: decode_body(body),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Build from the pieces axum hands to a handler.
    pub fn from_parts(
        method: &str,
        path: &str,
        headers: &HeaderMap,
        query: HashMap<String, String>,
        body: &[u8],
    ) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            query: query.into_iter().collect(),
            body: decode_body(body.to_vec()),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_post(&self) -> bool {
        self.method.eq_ignore_ascii_case("POST")
    }

    /// Reconstructs the public URL the delivery was addressed to:
    /// `https://{site_host}{path}/?{query}`, always with a trailing slash.
    pub fn canonical_url(&self, site_host: &str) -> Option<Url> {
        let mut url = Url::parse(&format!("https://{}", site_host)).ok()?;
        let mut path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        if !path.ends_with('/') {
            path.push('/');
        }
        url.set_path(&path);
        if !self.query.is_empty() {
            let query = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
        Some(url)
    }
}

/// Bodies may arrive base64-encoded by the transport. If the body decodes
/// cleanly it is replaced by the decoded bytes, otherwise kept verbatim.
pub fn decode_body(body: Vec<u8>) -> Vec<u8> {
    match STANDARD.decode(&body) {
        Ok(decoded) => decoded,
        Err(_) => body,
    }
}

/// API-Gateway proxy integration request, as delivered to a serverless handler.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayProxyRequest {
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

impl From<ApiGatewayProxyRequest> for WebhookEvent {
    fn from(req: ApiGatewayProxyRequest) -> Self {
        // The body is decoded whenever it is valid base64, flagged or not.
        debug!(
            is_base64_encoded = req.is_base64_encoded,
            "Proxy event for {} {}", req.http_method, req.path
        );
        let headers = req
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            method: req.http_method,
            path: req.path,
            headers,
            query: req
                .query_string_parameters
                .unwrap_or_default()
                .into_iter()
                .collect(),
            body: decode_body(req.body.unwrap_or_default().into_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayProxyResponse {
    pub status_code: u16,
    pub body: String,
}

impl ApiGatewayProxyResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }
}
