//! Builds the outward representation of a media item from its stored metadata
//! and whatever the video platform can currently tell us about it.
//!
//! Missing platform linkage and encodes that are not ready yet degrade to a
//! metadata-only view. Only a platform outage fails the assembly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::catalogue::{ExternalVideoRef, MediaItem, MediaType};
use crate::platform::{PlatformError, VideoPlatform};
use crate::sources::{DeliverySource, select_content_url};

pub const DEFAULT_POSTER_WIDTH: u32 = 640;

#[derive(Debug, Error)]
pub enum AssembleError {
    /// The platform could not be asked for sources. Callers surface this as a
    /// bad gateway.
    #[error("video platform unavailable while assembling {key}")]
    Gateway {
        key: ExternalVideoRef,
        #[source]
        source: PlatformError,
    },
}

/// Side channel for recoverable platform failures.
pub trait AssemblyObserver: Send + Sync {
    /// Called once when `key` has no deliverable sources yet.
    fn sources_unavailable(&self, item_id: &str, key: &ExternalVideoRef);
}

/// Default observer: one warning event per unready item.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl AssemblyObserver for TracingObserver {
    fn sources_unavailable(&self, item_id: &str, key: &ExternalVideoRef) {
        tracing::warn!(item_id, key = %key, "media sources not available yet, serving without sources");
    }
}

/// Read-only values supplied at process start.
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub legacy_base_url: Url,
    pub embed_player_key: Option<String>,
    pub content_base_url: Url,
    pub poster_width: u32,
}

/// Which optional parts of the representation to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssembleOptions {
    pub include_sources: bool,
    pub include_legacy_statistics: bool,
    pub include_channel: bool,
}

impl AssembleOptions {
    /// Single item view.
    pub fn detail() -> Self {
        Self {
            include_sources: true,
            include_legacy_statistics: true,
            include_channel: true,
        }
    }

    /// Listing view. Never touches the platform's delivery API.
    pub fn summary() -> Self {
        Self {
            include_sources: false,
            ..Self::detail()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRepresentation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub published_at: Option<DateTime<Utc>>,
    pub downloadable: bool,
    pub language: String,
    pub copyright: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub channel_id: Option<String>,
    pub poster_image_url: Option<String>,
    pub embed_url: Option<String>,
    pub legacy_statistics_url: Option<String>,
    pub sources: Vec<DeliverySource>,
    pub content_url: Option<String>,
}

pub struct ResponseAssembler {
    platform: Arc<dyn VideoPlatform>,
    observer: Arc<dyn AssemblyObserver>,
    settings: AssemblerSettings,
}

impl ResponseAssembler {
    pub fn new(
        platform: Arc<dyn VideoPlatform>,
        observer: Arc<dyn AssemblyObserver>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            platform,
            observer,
            settings,
        }
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    /// Projects `item` into its public representation. Blocks while the
    /// platform is asked for sources.
    pub fn assemble(
        &self,
        item: &MediaItem,
        options: AssembleOptions,
    ) -> Result<MediaRepresentation, AssembleError> {
        let key = item.external_ref.as_ref();

        let poster_image_url =
            key.map(|key| self.platform.poster_url(key, self.settings.poster_width));
        let embed_url = key.and_then(|key| self.embed_url(key));
        let legacy_statistics_url = if options.include_legacy_statistics {
            item.legacy_id.and_then(|id| self.legacy_statistics_url(id))
        } else {
            None
        };

        let sources = match key {
            Some(key) if options.include_sources && item.downloadable => {
                self.fetch_sources(&item.id, key)?
            }
            _ => Vec::new(),
        };
        let content_url = select_content_url(&sources).map(str::to_owned);

        Ok(MediaRepresentation {
            id: item.id.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            duration: item.duration,
            media_type: item.media_type,
            published_at: item.published_at,
            downloadable: item.downloadable,
            language: item.language.clone(),
            copyright: item.copyright.clone(),
            tags: item.tags.clone(),
            created_at: item.created_at,
            updated_at: item.updated_at,
            channel_id: if options.include_channel {
                item.channel_id.clone()
            } else {
                None
            },
            poster_image_url,
            embed_url,
            legacy_statistics_url,
            sources,
            content_url,
        })
    }

    fn fetch_sources(
        &self,
        item_id: &str,
        key: &ExternalVideoRef,
    ) -> Result<Vec<DeliverySource>, AssembleError> {
        match self.platform.fetch_sources(key) {
            Ok(sources) => Ok(sources),
            Err(PlatformError::NotFound { .. }) => {
                self.observer.sources_unavailable(item_id, key);
                Ok(Vec::new())
            }
            Err(err @ PlatformError::Transient { .. }) => Err(AssembleError::Gateway {
                key: key.clone(),
                source: err,
            }),
        }
    }

    fn embed_url(&self, key: &ExternalVideoRef) -> Option<String> {
        let player = self.settings.embed_player_key.as_deref()?;
        join_under_base(
            &self.settings.content_base_url,
            &format!("players/{key}-{player}.html"),
        )
    }

    /// Legacy ids are positive; anything else has no statistics page.
    fn legacy_statistics_url(&self, legacy_id: i64) -> Option<String> {
        if legacy_id <= 0 {
            return None;
        }
        join_under_base(
            &self.settings.legacy_base_url,
            &format!("media/{legacy_id}/statistics"),
        )
    }
}

/// Joins `path` onto `base`, appending rather than replacing the base's final
/// segment even when the base lacks a trailing `/`.
pub fn join_under_base(base: &Url, path: &str) -> Option<String> {
    if base.cannot_be_a_base() {
        return None;
    }
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path).ok().map(Into::into)
}
