//! Building the synthetic request, running the handler, and normalizing the
//! outcome into a [`BridgeResult`].

use std::collections::BTreeMap;

use http::{HeaderMap, Method, StatusCode, Uri};
use serde::Serialize;
use url::Url;

use crate::compose;
use crate::context::AmbientContext;
use crate::decode::Draft;
use crate::handler::{Handler, SyntheticRequest};
use crate::headers::canonical_header_key;
use crate::recorder::ResponseRecorder;

/// The only shape a script ever receives, for successes and construction
/// failures alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeResult {
    pub body: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub status: u16,
    pub method: String,
    pub url: String,
}

impl BridgeResult {
    /// Synthetic 500 for a request that could not be constructed.
    pub fn internal_error(method: String, url: String, error: impl std::fmt::Display) -> Self {
        Self {
            body: format!("Internal Server Error: {error}"),
            headers: BTreeMap::new(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            method,
            url,
        }
    }

    fn from_recorder(method: String, url: String, recorder: ResponseRecorder) -> Self {
        let (status, headers, body) = recorder.into_parts();
        Self {
            body: String::from_utf8_lossy(&body).into_owned(),
            headers: header_lists(&headers),
            status: status.as_u16(),
            method,
            url,
        }
    }
}

/// Why a synthetic request could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid method {0:?}")]
    InvalidMethod(String),
    #[error("parse {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported request target {0:?}")]
    UnsupportedTarget(String),
}

/// Parse `raw` as an absolute URL, resolving relative references against
/// `base` when one is configured. The fragment is removed.
///
/// The output is canonical: unescaped query characters are percent-encoded,
/// and resolving the serialized output again yields the same string.
pub fn resolve_url(raw: &str, base: Option<&Url>) -> Result<Url, BuildError> {
    let parsed = match (Url::parse(raw), base) {
        (Err(url::ParseError::RelativeUrlWithoutBase), Some(base)) => base.join(raw),
        (result, _) => result,
    };

    let mut url = parsed.map_err(|source| BuildError::InvalidUrl {
        url: raw.to_owned(),
        source,
    })?;
    url.set_fragment(None);
    Ok(url)
}

fn parse_method(method: &str) -> Result<Method, BuildError> {
    Method::from_bytes(method.as_bytes()).map_err(|_| BuildError::InvalidMethod(method.to_owned()))
}

/// Construct the synthetic request for `draft`, layering in the ambient
/// outer request.
pub fn build_request(
    draft: &Draft,
    base: Option<&Url>,
    ambient: Option<&AmbientContext>,
) -> Result<SyntheticRequest, BuildError> {
    let method = parse_method(&draft.method)?;
    let url = resolve_url(&draft.url, base)?;
    let uri: Uri = url
        .as_str()
        .parse()
        .map_err(|_| BuildError::UnsupportedTarget(url.to_string()))?;

    let mut headers = draft.headers.clone();
    let context = compose::composite(ambient, &mut headers);

    let mut request = http::Request::new(draft.body.clone());
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;
    request.extensions_mut().insert(context);
    Ok(request)
}

/// Run one fetch call against `handler`.
///
/// The handler is invoked at most once. Construction failures produce a
/// synthetic 500 and the handler is not called.
pub fn dispatch(
    handler: &dyn Handler,
    draft: Draft,
    base: Option<&Url>,
    ambient: Option<&AmbientContext>,
) -> BridgeResult {
    let request = match build_request(&draft, base, ambient) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(method = %draft.method, url = %draft.url, error = %e, "fetch request rejected");
            return BridgeResult::internal_error(draft.method, draft.url, e);
        }
    };

    let mut recorder = ResponseRecorder::new();
    handler.serve(request, &mut recorder);

    let result = BridgeResult::from_recorder(draft.method, draft.url, recorder);
    tracing::debug!(
        method = %result.method,
        url = %result.url,
        status = result.status,
        "fetch dispatched"
    );
    result
}

/// Group a header map into canonical name -> values lists.
fn header_lists(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut lists: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        lists
            .entry(canonical_header_key(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    lists
}
