//! Argument decoding for `__fetch__(url, options, callback)`.
//!
//! Decoding happens in two steps. On the loop thread the known option
//! fields are copied out one by one into an owned [`RawCall`]; script values
//! never leave that thread. The dispatch thread then turns the raw options into a typed
//! [`Draft`]. Every malformed or missing option falls back to its default:
//! decoding cannot fail.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use rquickjs::prelude::Coerced;
use rquickjs::{Ctx, FromJs, Function, Object, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Owned copy of a fetch call's arguments, detached from the script engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCall {
    pub url: String,
    pub options: serde_json::Value,
}

/// Replaces unpaired surrogates with U+FFFD.
const TO_WELL_FORMED: &str = r"(function (s) {
  return s.replace(/[\uD800-\uDBFF](?![\uDC00-\uDFFF])|(?<![\uD800-\uDBFF])[\uDC00-\uDFFF]/g, '\uFFFD');
})";

impl RawCall {
    /// Copy argument 0 (coerced to a string) and the known fields of
    /// argument 1 out of the script engine. Fields are copied one at a time
    /// and only `method`, `headers` and `body` are read; a field that cannot
    /// be copied is left out and the others are kept.
    pub fn from_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> Self {
        let url = args
            .first()
            .and_then(|v| {
                string_value(ctx, v).or_else(|| {
                    Coerced::<String>::from_js(ctx, v.clone())
                        .map(|c| c.0)
                        .map_err(|_| clear_exception(ctx))
                        .ok()
                })
            })
            .unwrap_or_default();

        let options = args
            .get(1)
            .filter(|v| !v.is_function())
            .and_then(|v| v.as_object())
            .map(|object| copy_options(ctx, object))
            .unwrap_or(serde_json::Value::Null);

        Self { url, options }
    }
}

fn copy_options<'js>(ctx: &Ctx<'js>, options: &Object<'js>) -> serde_json::Value {
    let mut bag = serde_json::Map::new();

    for key in ["method", "body"] {
        let Some(value) = field(ctx, options, key) else {
            continue;
        };
        match string_value(ctx, &value) {
            Some(s) => {
                bag.insert(key.into(), s.into());
            }
            None => tracing::debug!(option = key, "ignoring non-string fetch option"),
        }
    }

    if let Some(headers) = field(ctx, options, "headers").and_then(|v| copy_headers(ctx, &v)) {
        bag.insert("headers".into(), headers);
    }

    serde_json::Value::Object(bag)
}

/// Copy a `{ name: value | [values] }` object. Entries that are neither a
/// string nor an array become `null` and are skipped by [`decode`].
fn copy_headers<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<serde_json::Value> {
    if value.is_array() || value.is_function() {
        return None;
    }
    let object = value.as_object()?;

    let mut entries = serde_json::Map::new();
    for prop in object.props::<String, Value>() {
        let Ok((name, value)) = prop else {
            clear_exception(ctx);
            continue;
        };

        let copied = if let Some(s) = string_value(ctx, &value) {
            serde_json::Value::String(s)
        } else if let Some(items) = value.as_array() {
            items
                .iter::<Value>()
                .filter_map(|item| item.map_err(|_| clear_exception(ctx)).ok())
                .filter_map(|item| string_value(ctx, &item))
                .map(serde_json::Value::String)
                .collect()
        } else {
            serde_json::Value::Null
        };
        entries.insert(name, copied);
    }

    Some(serde_json::Value::Object(entries))
}

/// Read one property. A throwing getter counts as absent.
fn field<'js>(ctx: &Ctx<'js>, object: &Object<'js>, key: &str) -> Option<Value<'js>> {
    match object.get::<_, Value>(key) {
        Ok(value) if value.is_undefined() || value.is_null() => None,
        Ok(value) => Some(value),
        Err(_) => {
            clear_exception(ctx);
            tracing::debug!(option = key, "reading fetch option threw; ignoring it");
            None
        }
    }
}

/// Copy a script string. Unpaired surrogates become U+FFFD.
fn string_value<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    let s = value.as_string()?;
    match s.to_string() {
        Ok(s) => Some(s),
        Err(_) => ctx
            .eval::<Function, _>(TO_WELL_FORMED)
            .and_then(|f| f.call::<_, String>((s.clone(),)))
            .map_err(|_| clear_exception(ctx))
            .ok(),
    }
}

fn clear_exception(ctx: &Ctx<'_>) {
    let _ = ctx.catch();
}

/// Typed request description produced by the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Known keys of the options bag. Each field is read on its own; a bad
/// value in one never discards the others.
#[derive(Debug, Default, Deserialize)]
struct OptionsBag {
    #[serde(default, deserialize_with = "lenient")]
    method: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    headers: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, deserialize_with = "lenient")]
    body: Option<String>,
}

/// Deserialize `T`, mapping a mistyped value to `None` instead of an error.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Decode a raw call into a draft request.
pub fn decode(raw: RawCall) -> Draft {
    let bag = if raw.options.is_object() {
        OptionsBag::deserialize(&raw.options).unwrap_or_default()
    } else {
        if !raw.options.is_null() {
            tracing::debug!("fetch options are not an object; using defaults");
        }
        OptionsBag::default()
    };

    let method = match bag.method {
        Some(m) if !m.is_empty() => m,
        _ => http::Method::GET.to_string(),
    };

    Draft {
        method,
        url: raw.url,
        headers: bag.headers.map(decode_headers).unwrap_or_default(),
        body: bag.body.map(Bytes::from),
    }
}

/// Build the header multimap. Each entry is a sequence of strings (a lone
/// string counts as a one-element sequence); values are appended in order.
fn decode_headers(entries: BTreeMap<String, serde_json::Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in entries {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::debug!(header = %name, "skipping invalid header name");
            continue;
        };

        let items = match value {
            serde_json::Value::String(s) => vec![s],
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => {
                tracing::debug!(header = %name, "skipping header with non-string values");
                continue;
            }
        };

        for item in items {
            match HeaderValue::from_str(&item) {
                Ok(v) => {
                    headers.append(header_name.clone(), v);
                }
                Err(_) => tracing::debug!(header = %name, "skipping invalid header value"),
            }
        }
    }

    headers
}
