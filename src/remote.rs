use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{CatalogEntry, PackageId};
use crate::error::ShelfError;

pub trait CatalogClient: Send + Sync {
    fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, ShelfError>;
}

/// Source of download envelopes. Returns the raw response body; decoding is
/// the pipeline's job.
pub trait ArtifactClient: Send + Sync {
    fn download(&self, id: &PackageId) -> Result<Vec<u8>, ShelfError>;
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    object: Vec<serde_json::Value>,
}

/// Decodes a `getAllSoftware` body. Entries that do not parse, including ones
/// whose id is not a valid package id, are skipped with a warning so one bad
/// row cannot hide the rest of the catalog.
pub fn decode_catalog(body: &[u8]) -> Result<Vec<CatalogEntry>, ShelfError> {
    let parsed: CatalogResponse =
        serde_json::from_slice(body).map_err(ShelfError::CatalogDecode)?;
    tracing::debug!(
        message = %parsed.message,
        count = parsed.object.len(),
        "catalog fetched"
    );
    let entries = parsed
        .object
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
            match serde_json::from_value::<CatalogEntry>(value) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(index, id = %id, error = %err, "skipping catalog entry");
                    None
                }
            }
        })
        .collect();
    Ok(entries)
}

#[derive(Clone)]
pub struct HttpStoreClient {
    client: Client,
    base_url: String,
}

impl HttpStoreClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ShelfError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("softshelf/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ShelfError::CatalogHttp(err.to_string()))?,
        );

        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| ShelfError::CatalogHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/appStore/getAllSoftware", self.base_url)
    }

    pub fn download_url(&self, id: &PackageId) -> String {
        format!("{}/appStore/download/{}", self.base_url, id.as_str())
    }
}

fn status_message(response: Response, fallback: &str) -> (u16, String) {
    let status = response.status().as_u16();
    let message = response
        .text()
        .ok()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    (status, message)
}

impl CatalogClient for HttpStoreClient {
    fn fetch_catalog(&self) -> Result<Vec<CatalogEntry>, ShelfError> {
        let response = self
            .client
            .get(self.catalog_url())
            .send()
            .map_err(|err| ShelfError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = status_message(response, "catalog request failed");
            return Err(ShelfError::CatalogStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| ShelfError::CatalogHttp(err.to_string()))?;
        decode_catalog(&body)
    }
}

impl ArtifactClient for HttpStoreClient {
    fn download(&self, id: &PackageId) -> Result<Vec<u8>, ShelfError> {
        let response = self
            .client
            .get(self.download_url(id))
            .send()
            .map_err(|err| ShelfError::RetrievalHttp(err.to_string()))?;
        if !response.status().is_success() {
            let (status, message) = status_message(response, "download request failed");
            return Err(ShelfError::RetrievalStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| ShelfError::RetrievalHttp(err.to_string()))?;
        Ok(body.to_vec())
    }
}
