#![forbid(unsafe_code)]

//! Loads a JSON export of channels, media items and playlists into the
//! catalogue.
//!
//! The export looks like `{"channels": [...], "media": [...], "playlists": [...]}`;
//! every key is optional. Rows are upserted, so re-running an import is harmless.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use media_catalogue::catalogue::{CatalogueStore, Channel, MediaItem, Playlist};
use media_catalogue::config::{RuntimeOverrides, resolve_runtime_settings};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(about = "Import channels and media items into the catalogue database")]
struct ImportArgs {
    /// Catalogue database; defaults to CATALOGUE_DB.
    #[arg(long)]
    db: Option<PathBuf>,

    /// JSON export to load.
    export: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogueExport {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    media: Vec<MediaItem>,
    #[serde(default)]
    playlists: Vec<Playlist>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ImportSummary {
    channels: usize,
    media: usize,
    playlists: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = ImportArgs::parse();
    let settings = resolve_runtime_settings(RuntimeOverrides {
        catalogue_db: args.db.clone(),
        ..RuntimeOverrides::default()
    })?;

    let export = read_export(&args.export)?;
    let store = CatalogueStore::open(&settings.catalogue_db).await?;
    let summary = import(&store, &export).await?;

    tracing::info!(
        channels = summary.channels,
        media = summary.media,
        playlists = summary.playlists,
        db = %settings.catalogue_db.display(),
        "import complete"
    );
    Ok(())
}

fn read_export(path: &Path) -> Result<CatalogueExport> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing export {}", path.display()))
}

/// Channels go first, then media, then the playlists that reference them.
async fn import(store: &CatalogueStore, export: &CatalogueExport) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    for channel in &export.channels {
        store
            .upsert_channel(channel)
            .await
            .with_context(|| format!("importing channel {}", channel.id))?;
        summary.channels += 1;
    }
    for item in &export.media {
        if item.external_ref.is_none() {
            tracing::debug!(item_id = %item.id, "media item has no video platform key");
        }
        store
            .upsert_media_item(item)
            .await
            .with_context(|| format!("importing media item {}", item.id))?;
        summary.media += 1;
    }
    for playlist in &export.playlists {
        store
            .upsert_playlist(playlist)
            .await
            .with_context(|| format!("importing playlist {}", playlist.id))?;
        summary.playlists += 1;
    }
    Ok(summary)
}
