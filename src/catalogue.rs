//! Catalogue persistence layer: media items, the channels that own them and
//! the playlists that group them.
//!
//! Items are written by the import tool and read by the backend. Everything the
//! video platform computes on the fly (sources, posters) stays out of here.

use std::{fmt, path::Path};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

/// Opaque key of an asset on the external video platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalVideoRef(String);

impl ExternalVideoRef {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            bail!("external video key must not be empty");
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalVideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ExternalVideoRef {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ExternalVideoRef> for String {
    fn from(value: ExternalVideoRef) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    #[default]
    Unknown,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Unknown => "unknown",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "video" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Unknown,
        }
    }
}

/// Row stored in the `media_items` table.
///
/// `duration` and `media_type` are filled in by the platform's encode pipeline
/// and are treated as read-only by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloadable: bool,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub external_ref: Option<ExternalVideoRef>,
    #[serde(default)]
    pub legacy_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row stored in the `channels` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub legacy_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row stored in the `playlists` table. `media_ids` keeps the curated order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub media_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filters accepted by the media listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct MediaQuery {
    pub search: Option<String>,
    pub channel: Option<String>,
}

impl MediaQuery {
    pub fn matches(&self, item: &MediaItem) -> bool {
        if let Some(channel) = self.channel.as_deref()
            && item.channel_id.as_deref() != Some(channel)
        {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                item.title.to_lowercase().contains(&needle)
                    || item.description.to_lowercase().contains(&needle)
            }
            _ => true,
        }
    }
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            legacy_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS media_items (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            duration REAL NOT NULL DEFAULT 0,
            media_type TEXT NOT NULL DEFAULT 'unknown',
            published_at TEXT,
            downloadable INTEGER NOT NULL DEFAULT 0,
            language TEXT DEFAULT '',
            copyright TEXT DEFAULT '',
            tags_json TEXT DEFAULT '[]',
            channel_id TEXT,
            jwp_key TEXT,
            legacy_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT DEFAULT '',
            channel_id TEXT,
            media_ids_json TEXT DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_media_items_published_at ON media_items(published_at);
        CREATE INDEX IF NOT EXISTS idx_media_items_updated_at ON media_items(updated_at);
        CREATE INDEX IF NOT EXISTS idx_media_items_channel ON media_items(channel_id);
        CREATE INDEX IF NOT EXISTS idx_playlists_channel ON playlists(channel_id);
        "#,
    )
    .await?;
    Ok(())
}

/// Fixed-width nanosecond form, so text order matches time order.
fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("parsing stored timestamp {value:?}"))
}

/// Writable handle used by the import tool.
#[derive(Debug)]
pub struct CatalogueStore {
    conn: Connection,
}

impl CatalogueStore {
    /// Opens (and if necessary creates) the database and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalogue directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalogue DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO channels (id, title, description, legacy_id, created_at, updated_at)
                VALUES (:id, :title, :description, :legacy_id, :created_at, :updated_at)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    legacy_id = excluded.legacy_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    channel.id.as_str(),
                    channel.title.as_str(),
                    channel.description.as_str(),
                    channel.legacy_id,
                    format_timestamp(&channel.created_at),
                    format_timestamp(&channel.updated_at),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn upsert_playlist(&self, playlist: &Playlist) -> Result<()> {
        let media_ids_json =
            serde_json::to_string(&playlist.media_ids).context("serializing playlist media ids")?;

        self.conn
            .execute(
                r#"
                INSERT INTO playlists (
                    id, title, description, channel_id, media_ids_json, created_at, updated_at
                ) VALUES (
                    :id, :title, :description, :channel_id, :media_ids_json, :created_at, :updated_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    channel_id = excluded.channel_id,
                    media_ids_json = excluded.media_ids_json,
                    updated_at = excluded.updated_at
                "#,
                params![
                    playlist.id.as_str(),
                    playlist.title.as_str(),
                    playlist.description.as_str(),
                    playlist.channel_id.as_deref(),
                    media_ids_json,
                    format_timestamp(&playlist.created_at),
                    format_timestamp(&playlist.updated_at),
                ],
            )
            .await?;
        Ok(())
    }

    /// Inserts or updates a media item. `created_at` is kept from the first
    /// insert.
    pub async fn upsert_media_item(&self, item: &MediaItem) -> Result<()> {
        let tags_json = serde_json::to_string(&item.tags).context("serializing tags")?;

        self.conn
            .execute(
                r#"
                INSERT INTO media_items (
                    id, title, description, duration, media_type, published_at,
                    downloadable, language, copyright, tags_json, channel_id,
                    jwp_key, legacy_id, created_at, updated_at
                ) VALUES (
                    :id, :title, :description, :duration, :media_type, :published_at,
                    :downloadable, :language, :copyright, :tags_json, :channel_id,
                    :jwp_key, :legacy_id, :created_at, :updated_at
                )
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    duration = excluded.duration,
                    media_type = excluded.media_type,
                    published_at = excluded.published_at,
                    downloadable = excluded.downloadable,
                    language = excluded.language,
                    copyright = excluded.copyright,
                    tags_json = excluded.tags_json,
                    channel_id = excluded.channel_id,
                    jwp_key = excluded.jwp_key,
                    legacy_id = excluded.legacy_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    item.id.as_str(),
                    item.title.as_str(),
                    item.description.as_str(),
                    item.duration,
                    item.media_type.as_str(),
                    item.published_at.as_ref().map(format_timestamp),
                    item.downloadable as i64,
                    item.language.as_str(),
                    item.copyright.as_str(),
                    tags_json,
                    item.channel_id.as_deref(),
                    item.external_ref.as_ref().map(ExternalVideoRef::as_str),
                    item.legacy_id,
                    format_timestamp(&item.created_at),
                    format_timestamp(&item.updated_at),
                ],
            )
            .await?;

        Ok(())
    }
}

const PLAYLIST_COLUMNS: &str =
    "id, title, description, channel_id, media_ids_json, created_at, updated_at";

const MEDIA_COLUMNS: &str = r#"
    id, title, description, duration, media_type, published_at,
    downloadable, language, copyright, tags_json, channel_id,
    jwp_key, legacy_id, created_at, updated_at
"#;

/// Cloneable read-only handle shared by the backend handlers.
#[derive(Clone)]
pub struct CatalogueReader {
    conn: Connection,
}

impl CatalogueReader {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let db = Builder::new_local(path.as_ref())
            .build()
            .await
            .with_context(|| format!("opening catalogue DB {}", path.as_ref().display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Every media item, newest publication first. Unpublished items sort last.
    pub async fn list_media_items(&self) -> Result<Vec<MediaItem>> {
        let stmt = self
            .conn
            .prepare(&format!(
                r#"
                SELECT {MEDIA_COLUMNS}
                FROM media_items
                ORDER BY published_at IS NULL, published_at DESC, rowid DESC
                "#
            ))
            .await?;

        let mut rows = stmt.query(params![]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_media_item(&row)?);
        }
        Ok(items)
    }

    pub async fn get_media_item(&self, id: &str) -> Result<Option<MediaItem>> {
        let stmt = self
            .conn
            .prepare(&format!(
                r#"
                SELECT {MEDIA_COLUMNS}
                FROM media_items
                WHERE id = ?1
                "#
            ))
            .await?;

        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_media_item(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, description, legacy_id, created_at, updated_at
                FROM channels
                ORDER BY title COLLATE NOCASE ASC, id ASC
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![]).await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, title, description, legacy_id, created_at, updated_at
                FROM channels
                WHERE id = ?1
                "#,
            )
            .await?;

        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_channel(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let stmt = self
            .conn
            .prepare(&format!(
                r#"
                SELECT {PLAYLIST_COLUMNS}
                FROM playlists
                ORDER BY title COLLATE NOCASE ASC, id ASC
                "#
            ))
            .await?;

        let mut rows = stmt.query(params![]).await?;
        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(row_to_playlist(&row)?);
        }
        Ok(playlists)
    }

    pub async fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        let stmt = self
            .conn
            .prepare(&format!(
                r#"
                SELECT {PLAYLIST_COLUMNS}
                FROM playlists
                WHERE id = ?1
                "#
            ))
            .await?;

        let mut rows = stmt.query([id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_playlist(&row)?)),
            None => Ok(None),
        }
    }

    /// Changes whenever another connection commits a write.
    pub async fn data_version(&self) -> Result<i64> {
        let mut rows = self.conn.query("PRAGMA data_version", params![]).await?;
        let row = rows.next().await?.context("missing data_version row")?;
        Ok(row.get(0)?)
    }
}

/// Column order must match `MEDIA_COLUMNS`.
fn row_to_media_item(row: &Row) -> Result<MediaItem> {
    let media_type: String = row.get(4)?;
    let published_at: Option<String> = row.get(5)?;
    let tags_json: String = row.get(9)?;
    let jwp_key: Option<String> = row.get(11)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;

    let tags: Vec<String> = serde_json::from_str(&tags_json).context("parsing stored tags JSON")?;
    let external_ref = jwp_key
        .filter(|key| !key.trim().is_empty())
        .map(ExternalVideoRef::new)
        .transpose()?;

    Ok(MediaItem {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<Option<String>>(2)?.unwrap_or_default(),
        duration: row.get(3)?,
        media_type: MediaType::parse(&media_type),
        published_at: published_at.as_deref().map(parse_timestamp).transpose()?,
        downloadable: row.get::<i64>(6).map(|value| value != 0)?,
        language: row.get::<Option<String>>(7)?.unwrap_or_default(),
        copyright: row.get::<Option<String>>(8)?.unwrap_or_default(),
        tags,
        channel_id: row.get(10)?,
        external_ref,
        legacy_id: row.get(12)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_channel(row: &Row) -> Result<Channel> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Channel {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<Option<String>>(2)?.unwrap_or_default(),
        legacy_id: row.get(3)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_playlist(row: &Row) -> Result<Playlist> {
    let media_ids_json: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    let media_ids = match media_ids_json {
        Some(raw) => serde_json::from_str(&raw).context("parsing stored playlist media ids")?,
        None => Vec::new(),
    };

    Ok(Playlist {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get::<Option<String>>(2)?.unwrap_or_default(),
        channel_id: row.get(3)?,
        media_ids,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn sample_item(id: &str) -> MediaItem {
        MediaItem {
            id: id.to_owned(),
            title: format!("Item {id}"),
            description: "A lecture".into(),
            duration: 54.5,
            media_type: MediaType::Video,
            published_at: Some(at(2024, 1, 1)),
            downloadable: true,
            language: "eng".into(),
            copyright: "University".into(),
            tags: vec!["physics".into(), "lecture".into()],
            channel_id: Some("chan".into()),
            external_ref: Some(ExternalVideoRef::new("abc123").unwrap()),
            legacy_id: Some(1234),
            created_at: at(2023, 12, 1),
            updated_at: at(2023, 12, 2),
        }
    }

    fn sample_channel(id: &str, title: &str) -> Channel {
        Channel {
            id: id.into(),
            title: title.into(),
            description: "channel".into(),
            legacy_id: Some(7),
            created_at: at(2023, 1, 1),
            updated_at: at(2023, 1, 1),
        }
    }

    fn sample_playlist(id: &str, title: &str, media_ids: &[&str]) -> Playlist {
        Playlist {
            id: id.into(),
            title: title.into(),
            description: "playlist".into(),
            channel_id: Some("chan".into()),
            media_ids: media_ids.iter().map(|id| id.to_string()).collect(),
            created_at: at(2023, 2, 1),
            updated_at: at(2023, 2, 1),
        }
    }

    async fn create_store() -> Result<(tempfile::TempDir, CatalogueStore, CatalogueReader, PathBuf)>
    {
        let dir = tempdir()?;
        let path = dir.path().join("catalogue/test.db");
        let store = CatalogueStore::open(&path).await?;
        let reader = CatalogueReader::new(&path).await?;
        Ok((dir, store, reader, path))
    }

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (_temp, _store, reader, path) = create_store().await?;
        assert!(path.exists(), "database file should be created");

        for table in ["media_items", "channels", "playlists"] {
            let mut rows = reader
                .conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await?;
            let exists: Option<String> = rows
                .next()
                .await?
                .map(|row| row.get::<String>(0))
                .transpose()?;
            assert_eq!(exists.as_deref(), Some(table));
        }
        Ok(())
    }

    #[tokio::test]
    async fn upsert_media_item_roundtrip() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;

        let mut item = sample_item("alpha");
        store.upsert_media_item(&item).await?;

        let fetched = reader.get_media_item("alpha").await?.expect("item fetched");
        assert_eq!(fetched, item);

        item.title = "Updated".into();
        item.external_ref = None;
        item.legacy_id = None;
        store.upsert_media_item(&item).await?;
        let updated = reader.get_media_item("alpha").await?.expect("item fetched");
        assert_eq!(updated.title, "Updated");
        assert!(updated.external_ref.is_none());
        assert!(updated.legacy_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_media_items_newest_first_with_unpublished_last() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;

        let mut old = sample_item("old");
        old.published_at = Some(at(2022, 5, 1));
        let mut new = sample_item("new");
        new.published_at = Some(at(2024, 5, 1));
        let mut draft = sample_item("draft");
        draft.published_at = None;

        store.upsert_media_item(&draft).await?;
        store.upsert_media_item(&old).await?;
        store.upsert_media_item(&new).await?;

        let ids: Vec<String> = reader
            .list_media_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec!["new", "old", "draft"]);
        Ok(())
    }

    #[tokio::test]
    async fn channels_sorted_by_title() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        store.upsert_channel(&sample_channel("b", "zoology")).await?;
        store.upsert_channel(&sample_channel("a", "Astronomy")).await?;

        let channels = reader.list_channels().await?;
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "a");
        assert_eq!(channels[1].id, "b");

        let single = reader.get_channel("b").await?.expect("channel fetched");
        assert_eq!(single.legacy_id, Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn playlists_keep_media_order_and_sort_by_title() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;
        store
            .upsert_playlist(&sample_playlist("p2", "week two", &["c", "a", "b"]))
            .await?;
        store
            .upsert_playlist(&sample_playlist("p1", "Week one", &["b"]))
            .await?;

        let ids: Vec<String> = reader
            .list_playlists()
            .await?
            .into_iter()
            .map(|playlist| playlist.id)
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);

        let mut playlist = reader.get_playlist("p2").await?.expect("playlist fetched");
        assert_eq!(playlist, sample_playlist("p2", "week two", &["c", "a", "b"]));

        playlist.media_ids = vec!["a".into(), "a".into()];
        playlist.channel_id = None;
        store.upsert_playlist(&playlist).await?;
        let updated = reader.get_playlist("p2").await?.expect("playlist fetched");
        assert_eq!(updated.media_ids, vec!["a", "a"]);
        assert!(updated.channel_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn timestamps_keep_fractional_seconds() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;

        let mut item = sample_item("frac");
        item.created_at = "2024-01-01T00:00:00.5Z".parse()?;
        item.published_at = Some("2024-01-01T00:00:00.25Z".parse()?);
        store.upsert_media_item(&item).await?;

        let fetched = reader.get_media_item("frac").await?.expect("item fetched");
        assert_eq!(fetched.created_at, item.created_at);
        assert_eq!(fetched.published_at, item.published_at);
        Ok(())
    }

    #[tokio::test]
    async fn sub_second_publication_order_is_kept() -> Result<()> {
        let (_temp, store, reader, _path) = create_store().await?;

        let mut whole = sample_item("whole");
        whole.published_at = Some("2024-01-01T00:00:00Z".parse()?);
        let mut later = sample_item("later");
        later.published_at = Some("2024-01-01T00:00:00.5Z".parse()?);
        store.upsert_media_item(&later).await?;
        store.upsert_media_item(&whole).await?;

        let ids: Vec<String> = reader
            .list_media_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec!["later", "whole"]);
        Ok(())
    }

    #[tokio::test]
    async fn reader_returns_none_for_missing_entries() -> Result<()> {
        let (_temp, _store, reader, _path) = create_store().await?;
        assert!(reader.get_media_item("ghost").await?.is_none());
        assert!(reader.get_channel("ghost").await?.is_none());
        assert!(reader.get_playlist("ghost").await?.is_none());
        Ok(())
    }

    #[test]
    fn external_ref_rejects_blank_keys() {
        assert!(ExternalVideoRef::new("  ").is_err());
        assert_eq!(ExternalVideoRef::new(" k1 ").unwrap().as_str(), "k1");
        assert!(serde_json::from_str::<ExternalVideoRef>("\"\"").is_err());
    }

    #[test]
    fn media_query_matches_search_and_channel() {
        let item = sample_item("alpha");

        assert!(MediaQuery::default().matches(&item));
        assert!(
            MediaQuery {
                search: Some("LECT".into()),
                channel: None
            }
            .matches(&item)
        );
        assert!(
            !MediaQuery {
                search: Some("chemistry".into()),
                channel: None
            }
            .matches(&item)
        );
        assert!(
            !MediaQuery {
                search: None,
                channel: Some("other".into())
            }
            .matches(&item)
        );
        assert!(
            MediaQuery {
                search: Some("   ".into()),
                channel: Some("chan".into())
            }
            .matches(&item)
        );
    }
}
