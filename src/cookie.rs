//! Minimal request-cookie handling: reading a `Cookie` header and appending
//! cookies to a synthetic request.

use std::fmt;

use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};

/// A request cookie (name and value only; attributes are response-side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values with spaces or commas must travel quoted.
        if self.value.contains(|c: char| c == ' ' || c == ',') {
            write!(f, "{}=\"{}\"", self.name, self.value)
        } else {
            write!(f, "{}={}", self.name, self.value)
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'=' | b';' | b',' | b'"'))
}

/// Parse the pairs of a `Cookie` request header.
///
/// Pairs without `=` or with an invalid name are skipped.
pub fn parse_cookie_header(header: &str) -> Vec<Cookie> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if !is_valid_name(name) {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some(Cookie::new(name, value))
        })
        .collect()
}

/// Append `cookie` to the `Cookie` header, joining with any existing value.
pub fn add_cookie(headers: &mut HeaderMap, cookie: &Cookie) {
    let rendered = cookie.to_string();
    let joined = match headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}; {rendered}"),
        _ => rendered,
    };

    match HeaderValue::from_str(&joined) {
        Ok(value) => {
            headers.insert(COOKIE, value);
        }
        Err(_) => {
            tracing::debug!(cookie = %cookie.name, "skipping cookie with invalid header bytes");
        }
    }
}
