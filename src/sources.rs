#![forbid(unsafe_code)]

//! Delivery sources reported by the video platform and the policy that picks
//! the canonical content URL out of them.

use serde::{Deserialize, Serialize};

pub const VIDEO_MP4: &str = "video/mp4";
pub const AUDIO_MP4: &str = "audio/mp4";

/// One encoded rendition of a media asset. Produced per request from the
/// platform and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySource {
    pub mime_type: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl DeliverySource {
    pub fn new(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            url: url.into(),
            width: None,
            height: None,
        }
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

/// Picks the single best playable URL.
///
/// The tallest `video/mp4` rendition wins; the first one wins on ties. Video
/// renditions without a height cannot be ranked and are ignored. When no video
/// qualifies the first `audio/mp4` rendition is used, otherwise nothing is.
pub fn select_content_url(sources: &[DeliverySource]) -> Option<&str> {
    let mut video: Vec<&DeliverySource> = sources
        .iter()
        .filter(|source| source.mime_type == VIDEO_MP4 && source.height.is_some())
        .collect();

    if !video.is_empty() {
        // `sort_by` is stable, so equal heights keep their platform order.
        video.sort_by(|a, b| b.height.cmp(&a.height));
        return video.first().map(|source| source.url.as_str());
    }

    sources
        .iter()
        .find(|source| source.mime_type == AUDIO_MP4)
        .map(|source| source.url.as_str())
}
