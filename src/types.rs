//! Shared types used across pipeline stages.
//!
//! An [`ImageRef`] is what the selection hands to the pipeline; everything
//! downstream (loader, compositor, exporter) refers back to it for ids and
//! titles in reports and events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an image request presents itself to a cross-origin host.
///
/// A canvas only stays exportable if every image on it came from a host that
/// granted access for this mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// No cookies or auth headers. The host must answer with
    /// `Access-Control-Allow-Origin: *` or the app origin.
    #[default]
    Anonymous,
    /// Sends the request context's bearer token. The host must echo the exact
    /// app origin and allow credentials.
    Credentialed,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Anonymous => "anonymous",
            AccessMode::Credentialed => "credentialed",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable source image.
///
/// Immutable once fetched from the gallery; the pipeline never rewrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    /// Absolute URL, `file://` URL, or local path.
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub access: AccessMode,
}

impl ImageRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            year: None,
            access: AccessMode::Anonymous,
        }
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Build a reference from a CLI argument (URL or path).
    ///
    /// The title is the last path segment without its extension, so
    /// `https://host/u/sunset.jpg?w=2` becomes `sunset`.
    pub fn from_source(index: usize, source: &str) -> Self {
        let without_query = source.split(['?', '#']).next().unwrap_or(source);
        let last = without_query
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or(without_query);
        let title = match last.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => last,
        };
        Self::new((index + 1).to_string(), source, title)
    }
}

/// Explicit request credentials and endpoint for gallery and image hosts.
///
/// Passed by value into clients instead of being read from ambient state at
/// request time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Base URL of the gallery API, e.g. `http://localhost:4000/api/galleryupload`.
    pub base_url: String,
    /// Bearer token sent on credentialed requests.
    pub token: Option<String>,
}

impl RequestContext {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
