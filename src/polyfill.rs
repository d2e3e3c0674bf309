//! The script-side fetch bundle.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Global name of the native entry point the bundle calls.
pub const BINDING: &str = "__fetch__";

const EMBEDDED_NAME: &str = "fetch.js";
const EMBEDDED_SOURCE: &str = include_str!("../polyfill/fetch.js");

/// An opaque script bundle implementing `fetch` on top of [`BINDING`].
/// Loaded once; every environment runs the same bytes.
#[derive(Debug, Clone)]
pub struct Polyfill {
    name: String,
    source: Arc<str>,
}

impl Polyfill {
    /// The bundle compiled into this crate.
    pub fn embedded() -> Self {
        Self::from_source(EMBEDDED_NAME, EMBEDDED_SOURCE)
    }

    pub fn from_source(name: impl Into<String>, source: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Read a replacement bundle from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| Error::Polyfill {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| EMBEDDED_NAME.to_string());
        Ok(Self::from_source(name, source))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for Polyfill {
    fn default() -> Self {
        Self::embedded()
    }
}
