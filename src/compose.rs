//! Layering outer-request state onto a synthetic request.

use http::{HeaderMap, HeaderName};

use crate::context::{AmbientContext, RequestContext};
use crate::cookie;

/// Merge the ambient outer request into `headers` and pick the context the
/// synthetic request runs under.
///
/// - no ambient context, or one without an outer request: headers untouched,
///   fresh context;
/// - outer cookies are appended to the `Cookie` header;
/// - the outer [`RequestContext`], when present, replaces the fresh one;
/// - forwarding (`None` / empty / named list) appends outer header values
///   after whatever the script set under the same name.
pub fn composite(ambient: Option<&AmbientContext>, headers: &mut HeaderMap) -> RequestContext {
    let Some(outer) = ambient.and_then(|a| a.request.as_deref()) else {
        return RequestContext::default();
    };

    for c in &outer.cookies {
        cookie::add_cookie(headers, c);
    }

    match ambient.and_then(|a| a.forwarded_headers.as_deref()) {
        None => {}
        Some([]) => {
            for (name, value) in &outer.headers {
                headers.append(name.clone(), value.clone());
            }
        }
        Some(names) => {
            for name in names {
                let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                    tracing::debug!(header = %name, "ignoring invalid forwarded header name");
                    continue;
                };
                for value in outer.headers.get_all(&name) {
                    headers.append(name.clone(), value.clone());
                }
            }
        }
    }

    outer.context.clone().unwrap_or_default()
}
