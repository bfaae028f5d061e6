#![forbid(unsafe_code)]

//! Seam to the external video platform plus the blocking JW Platform client
//! used in production.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::catalogue::ExternalVideoRef;
use crate::sources::DeliverySource;

/// Failures reported while asking the platform for delivery sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The asset exists locally but the platform cannot serve it yet, usually
    /// because the encode is still running.
    #[error("media {key} is not available on the video platform")]
    NotFound { key: String },
    /// The platform itself could not be reached or answered with an error.
    #[error("video platform request failed: {reason}")]
    Transient { reason: String },
}

impl PlatformError {
    pub fn not_found(key: &ExternalVideoRef) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }
}

/// Everything the response assembler needs from the video platform.
pub trait VideoPlatform: Send + Sync {
    /// Thumbnail URL for `key` scaled to `width` pixels.
    fn poster_url(&self, key: &ExternalVideoRef, width: u32) -> String;

    /// Renditions the platform can currently deliver for `key`. Blocks.
    fn fetch_sources(&self, key: &ExternalVideoRef) -> Result<Vec<DeliverySource>, PlatformError>;
}

pub const DEFAULT_DELIVERY_BASE_URL: &str = "https://cdn.jwplayer.com/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the public JW Platform delivery API.
pub struct JwPlatformClient {
    agent: ureq::Agent,
    delivery_base: Url,
}

impl JwPlatformClient {
    pub fn new(delivery_base: Url, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            delivery_base,
        }
    }

    fn media_url(&self, key: &ExternalVideoRef) -> Result<Url, PlatformError> {
        self.delivery_base
            .join(&format!("v2/media/{key}"))
            .map_err(|err| PlatformError::transient(format!("building delivery URL: {err}")))
    }
}

impl VideoPlatform for JwPlatformClient {
    fn poster_url(&self, key: &ExternalVideoRef, width: u32) -> String {
        let path = format!("thumbs/{key}-{width}.jpg");
        match self.delivery_base.join(&path) {
            Ok(url) => url.into(),
            Err(_) => format!("{}{path}", self.delivery_base),
        }
    }

    fn fetch_sources(&self, key: &ExternalVideoRef) -> Result<Vec<DeliverySource>, PlatformError> {
        let url = self.media_url(key)?;
        tracing::debug!(%url, "fetching delivery sources");

        let response = self
            .agent
            .get(url.as_str())
            .call()
            .map_err(|err| classify_error(key, err))?;
        let payload: DeliveryPayload = response
            .into_json()
            .map_err(|err| PlatformError::transient(format!("decoding delivery payload: {err}")))?;

        payload.into_sources(key)
    }
}

fn classify_error(key: &ExternalVideoRef, err: ureq::Error) -> PlatformError {
    match err {
        ureq::Error::Status(404, _) => PlatformError::not_found(key),
        ureq::Error::Status(code, response) => PlatformError::transient(format!(
            "HTTP {code} {} from {}",
            response.status_text(),
            response.get_url()
        )),
        ureq::Error::Transport(transport) => PlatformError::transient(transport.to_string()),
    }
}

/// Body of `GET /v2/media/{key}`. Only the fields we consume are modelled.
#[derive(Debug, Deserialize)]
struct DeliveryPayload {
    #[serde(default)]
    playlist: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    mime_type: Option<String>,
    file: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl DeliveryPayload {
    fn into_sources(self, key: &ExternalVideoRef) -> Result<Vec<DeliverySource>, PlatformError> {
        let entry = self
            .playlist
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::not_found(key))?;

        Ok(entry
            .sources
            .into_iter()
            .filter_map(|raw| {
                let mime_type = raw.mime_type.filter(|value| !value.is_empty())?;
                let url = raw.file.filter(|value| !value.is_empty())?;
                Some(DeliverySource::new(mime_type, url).with_dimensions(raw.width, raw.height))
            })
            .collect())
    }
}
