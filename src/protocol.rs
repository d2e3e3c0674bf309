//! JSON request/response types for the sidecar protocol.

use std::collections::BTreeMap;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::context::{AmbientContext, OuterRequest, RequestContext};
use crate::cookie::Cookie;

/// Script name answered without running anything.
pub const HEALTH_CHECK: &str = "_health";

/// A script execution request from the controller.
#[derive(Debug, Deserialize)]
pub struct Request {
    /// Unique request ID for correlation.
    pub request_id: String,
    /// Script source, run as the body of an async function.
    pub script: String,
    /// The inbound request the script runs on behalf of.
    #[serde(default)]
    pub outer: Option<OuterSpec>,
    /// Outer headers to forward: absent forwards none, empty forwards all.
    #[serde(default)]
    pub forwarded_headers: Option<Vec<String>>,
    /// Per-request timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Wire form of an outer request.
#[derive(Debug, Default, Deserialize)]
pub struct OuterSpec {
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
}

/// Context value carrying the sidecar request id, visible to handlers
/// through [`RequestContext::value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl Request {
    pub fn is_health_check(&self) -> bool {
        self.script == HEALTH_CHECK
    }

    /// Ambient context for this request's environment, running under
    /// `context`.
    pub fn ambient(&self, context: RequestContext) -> AmbientContext {
        let spec = self.outer.as_ref();
        let mut outer = OuterRequest::new(spec.map(|s| header_map(&s.headers)).unwrap_or_default())
            .with_context(context.with_value(RequestId(self.request_id.clone())));
        for (name, value) in spec.into_iter().flat_map(|s| &s.cookies) {
            outer = outer.with_cookie(Cookie::new(name.as_str(), value.as_str()));
        }

        AmbientContext {
            request: Some(outer.into()),
            forwarded_headers: self.forwarded_headers.clone(),
        }
    }
}

fn header_map(headers: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "skipping invalid outer header name");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                map.append(name.clone(), value);
            }
        }
    }
    map
}

/// A script execution response back to the controller.
#[derive(Debug, Serialize)]
pub struct Response {
    /// Whether the script resolved.
    pub success: bool,
    /// `"ok"` on success, the error message on failure.
    pub result: String,
    /// The script's resolved value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn success(result: String) -> Self {
        Self {
            success: true,
            result,
            data: None,
        }
    }

    pub fn success_with_data(result: String, data: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
            data: Some(data),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            result: message,
            data: None,
        }
    }
}
