//! Fixed-response route table.
//!
//! Loads route definitions from .toml files in the route directory. Each
//! file describes one canned response for a path and optional method.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::handler::{Handler, SyntheticRequest};
use crate::recorder::ResponseRecorder;

/// A canned response, loaded from a route file.
#[derive(Debug, Clone)]
pub struct Route {
    /// Method to match; `None` matches any.
    pub method: Option<Method>,
    /// Exact request path (query ignored).
    pub path: String,
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: String,
}

/// TOML structure for route files.
#[derive(serde::Deserialize)]
struct RouteToml {
    #[serde(default)]
    method: Option<String>,
    path: String,
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: String,
}

fn default_status() -> u16 {
    200
}

/// Ordered set of routes; the first match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all route files from a directory, in file name order.
    /// A missing directory yields an empty table; unreadable or invalid
    /// files are logged and skipped.
    pub fn load(route_dir: &Path) -> anyhow::Result<Self> {
        let mut table = Self::new();

        if !route_dir.exists() {
            tracing::warn!(dir = %route_dir.display(), "route directory does not exist, starting with empty table");
            return Ok(table);
        }

        let mut paths = std::fs::read_dir(route_dir)
            .with_context(|| format!("failed to read route dir {}", route_dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        paths.sort();

        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            match Self::load_route_toml(&path) {
                Ok(route) => {
                    tracing::info!(path = %route.path, file = %path.display(), "loaded route");
                    table.register(route);
                }
                Err(e) => tracing::warn!(file = %path.display(), error = %format!("{e:#}"), "skipping route file"),
            }
        }

        Ok(table)
    }

    /// Parse a single route file.
    fn load_route_toml(toml_path: &Path) -> anyhow::Result<Route> {
        let content = std::fs::read_to_string(toml_path)
            .with_context(|| format!("failed to read {}", toml_path.display()))?;
        let parsed: RouteToml = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", toml_path.display()))?;

        let method = parsed
            .method
            .map(|m| Method::from_bytes(m.as_bytes()).with_context(|| format!("invalid method {m:?}")))
            .transpose()?;
        let status = StatusCode::from_u16(parsed.status)
            .with_context(|| format!("invalid status {}", parsed.status))?;
        let headers = parsed
            .headers
            .into_iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("invalid header name {name:?}"))?;
                let value = HeaderValue::from_str(&value)
                    .with_context(|| format!("invalid value for header {name}"))?;
                Ok((name, value))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Route {
            method,
            path: parsed.path,
            status,
            headers,
            body: parsed.body,
        })
    }

    /// Find the first route for `path` whose method matches.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.path == path && r.method.as_ref().map_or(true, |m| m == method))
    }

    pub fn register(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Handler for RouteTable {
    fn serve(&self, req: SyntheticRequest, res: &mut ResponseRecorder) {
        let Some(route) = self.lookup(req.method(), req.uri().path()) else {
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            res.write_header(StatusCode::NOT_FOUND);
            res.write_body(b"not found");
            return;
        };

        for (name, value) in &route.headers {
            res.headers_mut().append(name.clone(), value.clone());
        }
        res.write_header(route.status);
        res.write_body(route.body.as_bytes());
    }
}
