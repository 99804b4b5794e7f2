//! Read-only client for the gallery API.
//!
//! The collage pipeline only needs to *find* images: list a page of the
//! gallery (optionally filtered by name or year) or look up one item, then
//! turn items into [`ImageRef`]s. Uploads and edits are not handled here.
//!
//! Credentials are passed explicitly through a [`RequestContext`]; the client
//! holds no token of its own.
//!
//! ## Wire format
//!
//! ```text
//! GET {base}/?page=1&limit=20&photo_name=&year=
//! → { "docs": [...], "totalDocs": 42, "limit": 20, "totalPages": 3,
//!     "page": 1, "hasNextPage": true, "hasPrevPage": false }
//!
//! GET {base}/{id}
//! → { "_id": "...", "photo_name": "Dusk", "year": 2021, "image": "/uploads/dusk.jpg" }
//! ```
//!
//! Bodies may also arrive wrapped as `{ "success": bool, "data": ..., "message": ... }`.

use crate::types::{AccessMode, ImageRef, RequestContext};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gallery API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("gallery API error: {0}")]
    Api(String),
    #[error("invalid gallery response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid gallery URL: {0}")]
    InvalidUrl(String),
}

/// One gallery entry as the API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub photo_name: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    /// Path relative to the asset base URL, or an absolute URL.
    pub image: String,
}

impl GalleryItem {
    /// Resolve the item's image against `asset_base` and wrap it for the
    /// collage pipeline.
    pub fn to_image_ref(&self, asset_base: &str, access: AccessMode) -> ImageRef {
        let url = if self.image.starts_with("http://") || self.image.starts_with("https://") {
            self.image.clone()
        } else {
            format!(
                "{}/{}",
                asset_base.trim_end_matches('/'),
                self.image.trim_start_matches('/')
            )
        };
        let image = ImageRef::new(self.id.clone(), url, self.photo_name.clone()).with_access(access);
        match self.year {
            Some(year) => image.with_year(year),
            None => image,
        }
    }
}

/// A page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage<T> {
    pub docs: Vec<T>,
    pub total_docs: u64,
    pub limit: u32,
    pub total_pages: u32,
    pub page: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_prev_page: bool,
}

/// Filters for [`GalleryClient::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    /// Free-text match on the photo name.
    pub search: String,
    pub year: Option<i32>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            search: String::new(),
            year: None,
        }
    }
}

impl ListQuery {
    /// Query parameters in wire order. Empty filters are sent as empty values.
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
            ("photo_name", self.search.clone()),
            ("year", self.year.map(|y| y.to_string()).unwrap_or_default()),
        ]
    }
}

/// Listing URL for `query` under `base_url`.
pub fn list_url(base_url: &str, query: &ListQuery) -> Result<reqwest::Url, GalleryError> {
    let root = format!("{}/", base_url.trim_end_matches('/'));
    reqwest::Url::parse_with_params(&root, query.pairs())
        .map_err(|e| GalleryError::InvalidUrl(format!("{base_url}: {e}")))
}

/// Detail URL for one item.
pub fn item_url(base_url: &str, id: &str) -> Result<reqwest::Url, GalleryError> {
    let root = reqwest::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
        .map_err(|e| GalleryError::InvalidUrl(format!("{base_url}: {e}")))?;
    root.join(id)
        .map_err(|e| GalleryError::InvalidUrl(format!("{id}: {e}")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Body<T> {
    Envelope {
        success: bool,
        data: Option<T>,
        message: Option<String>,
    },
    Bare(T),
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Turn a status and body into a value, unwrapping `{ success, data }` when present.
pub fn decode_body<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, GalleryError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| "request failed".to_string());
        return Err(GalleryError::Status { status, message });
    }
    match serde_json::from_str::<Body<T>>(body) {
        Ok(Body::Bare(value)) => Ok(value),
        Ok(Body::Envelope {
            success: true,
            data: Some(value),
            ..
        }) => Ok(value),
        Ok(Body::Envelope { message, .. }) => Err(GalleryError::Api(
            message.unwrap_or_else(|| "request failed".to_string()),
        )),
        // Re-decode as the bare type to surface the real field error.
        Err(_) => Ok(serde_json::from_str::<T>(body)?),
    }
}

pub struct GalleryClient {
    client: reqwest::Client,
}

impl GalleryClient {
    pub fn new(timeout: Duration) -> Result<Self, GalleryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        url: reqwest::Url,
    ) -> Result<T, GalleryError> {
        tracing::debug!(url = %url, "gallery request");
        let mut request = self.client.get(url);
        if let Some(token) = &ctx.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_body(status, &body)
    }

    /// One page of the gallery.
    pub async fn list(
        &self,
        ctx: &RequestContext,
        query: &ListQuery,
    ) -> Result<ListPage<GalleryItem>, GalleryError> {
        let url = list_url(&ctx.base_url, query)?;
        self.get_json(ctx, url).await
    }

    /// A single item by id.
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<GalleryItem, GalleryError> {
        let url = item_url(&ctx.base_url, id)?;
        self.get_json(ctx, url).await
    }
}
