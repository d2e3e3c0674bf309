//! Caller-scoped state a synthetic request can inherit.
//!
//! The host describes the real inbound request (if any) that caused a script
//! to run as an [`OuterRequest`], and hands the bridge an
//! [`AmbientProvider`] that yields it at call time. Nothing is read from
//! globals: the provider is the only channel.

use std::sync::{Arc, PoisonError, RwLock};

use http::header::COOKIE;
use http::{Extensions, HeaderMap};
use tokio_util::sync::CancellationToken;

use crate::cookie::{self, Cookie};

/// Cancellation signal plus typed ambient values carried by a request.
///
/// Clones share the same cancellation token. Every synthetic request carries
/// exactly one of these in its extensions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    values: Extensions,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a typed value, replacing any previous value of the same type.
    pub fn with_value<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.values.insert(value);
        self
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// The real inbound request a script environment is running on behalf of.
#[derive(Debug, Clone, Default)]
pub struct OuterRequest {
    /// Headers available for forwarding.
    pub headers: HeaderMap,
    /// Cookies injected into every synthetic request.
    pub cookies: Vec<Cookie>,
    /// Cancellation/value context the synthetic request inherits.
    pub context: Option<RequestContext>,
}

impl OuterRequest {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Capture headers, `Cookie` header pairs and any [`RequestContext`]
    /// extension from a real request.
    pub fn from_http<B>(request: &http::Request<B>) -> Self {
        let cookies = request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(cookie::parse_cookie_header)
            .collect();

        Self {
            headers: request.headers().clone(),
            cookies,
            context: request.extensions().get::<RequestContext>().cloned(),
        }
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Per-invocation state supplied by the host.
///
/// `forwarded_headers`: `None` forwards nothing, an empty list forwards every
/// outer header, a non-empty list forwards exactly the named headers.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    pub request: Option<Arc<OuterRequest>>,
    pub forwarded_headers: Option<Vec<String>>,
}

impl AmbientContext {
    pub fn new(request: OuterRequest) -> Self {
        Self {
            request: Some(Arc::new(request)),
            forwarded_headers: None,
        }
    }

    pub fn with_forwarded_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forwarded_headers = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Forward every header of the outer request.
    pub fn forward_all(mut self) -> Self {
        self.forwarded_headers = Some(Vec::new());
        self
    }
}

/// Source of the ambient context, consulted on the loop thread each time a
/// script calls fetch.
pub trait AmbientProvider: Send + Sync {
    fn ambient(&self) -> Option<AmbientContext>;
}

impl AmbientProvider for AmbientContext {
    fn ambient(&self) -> Option<AmbientContext> {
        Some(self.clone())
    }
}

impl<F> AmbientProvider for F
where
    F: Fn() -> Option<AmbientContext> + Send + Sync,
{
    fn ambient(&self) -> Option<AmbientContext> {
        self()
    }
}

/// Shared, swappable ambient context for hosts that reuse one environment
/// across several outer invocations.
#[derive(Debug, Clone, Default)]
pub struct AmbientSlot {
    current: Arc<RwLock<Option<AmbientContext>>>,
}

impl AmbientSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ambient: AmbientContext) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(ambient);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl AmbientProvider for AmbientSlot {
    fn ambient(&self) -> Option<AmbientContext> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[derive(Debug, Clone, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn test_context_values_and_cancel() {
        let ctx = RequestContext::new().with_value(Tenant("acme"));
        let clone = ctx.clone();
        assert_eq!(clone.value::<Tenant>(), Some(&Tenant("acme")));
        assert!(!clone.is_cancelled());
        ctx.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_outer_from_http() {
        let mut request = http::Request::new(());
        request
            .headers_mut()
            .insert("x-user-header", HeaderValue::from_static("olebedev"));
        request
            .headers_mut()
            .append(COOKIE, HeaderValue::from_static("a=1; b=2"));
        request
            .extensions_mut()
            .insert(RequestContext::new().with_value(Tenant("acme")));

        let outer = OuterRequest::from_http(&request);
        assert_eq!(outer.headers.get("X-User-Header").unwrap(), "olebedev");
        assert_eq!(outer.cookies, vec![Cookie::new("a", "1"), Cookie::new("b", "2")]);
        let ctx = outer.context.expect("context extension");
        assert_eq!(ctx.value::<Tenant>(), Some(&Tenant("acme")));
    }

    #[test]
    fn test_slot_provider() {
        let slot = AmbientSlot::new();
        assert!(slot.ambient().is_none());
        slot.set(AmbientContext::new(OuterRequest::default()).forward_all());
        let ambient = slot.ambient().expect("ambient set");
        assert_eq!(ambient.forwarded_headers, Some(Vec::new()));
        slot.clear();
        assert!(slot.ambient().is_none());
    }
}
