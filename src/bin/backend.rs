#![forbid(unsafe_code)]

//! Axum backend that serves the media catalogue as JSON.
//!
//! Catalogue rows come from the local database. Posters, embed links and
//! playable sources are resolved against the video platform per request, on a
//! blocking thread because the platform client is synchronous.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use media_catalogue::assembler::{
    AssembleError, AssembleOptions, MediaRepresentation, ResponseAssembler, TracingObserver,
    join_under_base,
};
use media_catalogue::catalogue::{CatalogueReader, Channel, MediaItem, MediaQuery, Playlist};
use media_catalogue::config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings};
use media_catalogue::platform::JwPlatformClient;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::signal;

#[derive(Debug, Clone)]
struct BackendArgs {
    settings: RuntimeSettings,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--db=") {
                overrides.catalogue_db = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                overrides.port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                overrides.host = Some(value.to_string());
                continue;
            }

            match arg.as_str() {
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    overrides.catalogue_db = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--port requires a value"))?;
                    overrides.port = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    overrides.host = Some(value);
                }
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let settings = resolve_runtime_settings(overrides)?;
        let listen_host = parse_host_arg(&settings.host)?;
        Ok(Self {
            settings,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/CATALOGUE_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    reader: Arc<CatalogueReader>,
    cache: Arc<ApiCache>,
    assembler: Arc<ResponseAssembler>,
}

/// Catalogue rows memoized until another connection writes to the database.
///
/// Only stored metadata is cached. Platform lookups run on every request
/// because encode state changes independently of the catalogue.
struct ApiCache {
    media_items: RwLock<Option<Vec<MediaItem>>>,
    media_details: RwLock<HashMap<String, MediaItem>>,
    channels: RwLock<Option<Vec<Channel>>>,
    playlists: RwLock<Option<Vec<Playlist>>>,
    last_db_version: RwLock<Option<i64>>,
}

impl ApiCache {
    fn new() -> Self {
        Self {
            media_items: RwLock::new(None),
            media_details: RwLock::new(HashMap::new()),
            channels: RwLock::new(None),
            playlists: RwLock::new(None),
            last_db_version: RwLock::new(None),
        }
    }

    fn clear(&self) {
        self.media_items.write().take();
        self.media_details.write().clear();
        self.channels.write().take();
        self.playlists.write().take();
    }

    /// Runs `fill` only if `version` is still the newest data version seen.
    /// Rows read under an older version are dropped instead of cached.
    fn fill_if_current(&self, version: i64, fill: impl FnOnce(&Self)) -> bool {
        let last = self.last_db_version.read();
        if *last != Some(version) {
            return false;
        }
        fill(self);
        true
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl From<AssembleError> for ApiError {
    fn from(err: AssembleError) -> Self {
        let AssembleError::Gateway { key, source } = &err;
        tracing::error!(key = %key, error = %source, "video platform call failed");
        Self::bad_gateway(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let BackendArgs {
        settings,
        listen_host,
    } = BackendArgs::parse()?;

    let reader = CatalogueReader::new(&settings.catalogue_db)
        .await
        .context("initializing catalogue reader")?;
    let platform = JwPlatformClient::new(
        settings.delivery_base_url.clone(),
        settings.platform_timeout,
    );
    if settings.embed_player_key.is_none() {
        tracing::warn!("JWPLATFORM_EMBED_PLAYER_KEY not set, embed URLs are disabled");
    }
    let assembler = ResponseAssembler::new(
        Arc::new(platform),
        Arc::new(TracingObserver),
        settings.assembler_settings(),
    );

    let state = AppState {
        reader: Arc::new(reader),
        cache: Arc::new(ApiCache::new()),
        assembler: Arc::new(assembler),
    };

    let addr = SocketAddr::new(listen_host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/media", get(list_media))
        .route("/api/media/{id}", get(get_media))
        .route("/api/channels", get(list_channels))
        .route("/api/channels/{id}", get(get_channel))
        .route("/api/playlists", get(list_playlists))
        .route("/api/playlists/{id}", get(get_playlist))
        .fallback(api_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

const DEFAULT_RESULT_LIMIT: usize = 100;
const MAX_RESULT_LIMIT: usize = 1000;

fn result_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_RESULT_LIMIT)
        .clamp(1, MAX_RESULT_LIMIT)
}

#[derive(Debug, Default, Deserialize)]
struct MediaListParams {
    search: Option<String>,
    channel: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaylistListParams {
    channel: Option<String>,
    limit: Option<usize>,
}

impl From<&MediaListParams> for MediaQuery {
    fn from(params: &MediaListParams) -> Self {
        Self {
            search: params.search.clone(),
            channel: params.channel.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelDetail {
    #[serde(flatten)]
    channel: Channel,
    legacy_collection_url: Option<String>,
    media: Vec<MediaRepresentation>,
}

#[derive(Debug, Serialize)]
struct PlaylistDetail {
    #[serde(flatten)]
    playlist: Playlist,
    media: Vec<MediaRepresentation>,
}

async fn list_media(
    State(state): State<AppState>,
    Query(params): Query<MediaListParams>,
) -> ApiResult<Json<ListResponse<MediaRepresentation>>> {
    let query = MediaQuery::from(&params);
    let items: Vec<MediaItem> = state
        .get_media_items()
        .await?
        .into_iter()
        .filter(|item| query.matches(item))
        .take(result_limit(params.limit))
        .collect();
    let results = state.assemble(items, AssembleOptions::summary()).await?;
    Ok(Json(ListResponse { results }))
}

async fn get_media(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<MediaRepresentation>> {
    let item = state.get_media_item(&id).await?;
    let mut assembled = state.assemble(vec![item], AssembleOptions::detail()).await?;
    let representation = assembled
        .pop()
        .ok_or_else(|| ApiError::internal("assembly produced no representation"))?;
    Ok(Json(representation))
}

async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<ListResponse<Channel>>> {
    let results = state.get_channels().await?;
    Ok(Json(ListResponse { results }))
}

async fn get_channel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ChannelDetail>> {
    let channel = state
        .get_channels()
        .await?
        .into_iter()
        .find(|channel| channel.id == id)
        .ok_or_else(|| ApiError::not_found("channel not found"))?;

    let query = MediaQuery {
        channel: Some(channel.id.clone()),
        ..MediaQuery::default()
    };
    let items: Vec<MediaItem> = state
        .get_media_items()
        .await?
        .into_iter()
        .filter(|item| query.matches(item))
        .collect();
    let media = state.assemble(items, AssembleOptions::summary()).await?;

    let legacy_collection_url = channel.legacy_id.filter(|id| *id > 0).and_then(|legacy_id| {
        join_under_base(
            &state.assembler.settings().legacy_base_url,
            &format!("collection/{legacy_id}"),
        )
    });

    Ok(Json(ChannelDetail {
        channel,
        legacy_collection_url,
        media,
    }))
}

async fn list_playlists(
    State(state): State<AppState>,
    Query(params): Query<PlaylistListParams>,
) -> ApiResult<Json<ListResponse<Playlist>>> {
    let results = state
        .get_playlists()
        .await?
        .into_iter()
        .filter(|playlist| {
            params
                .channel
                .as_deref()
                .is_none_or(|channel| playlist.channel_id.as_deref() == Some(channel))
        })
        .take(result_limit(params.limit))
        .collect();
    Ok(Json(ListResponse { results }))
}

/// Media come back in playlist order; ids that no longer resolve are skipped.
async fn get_playlist(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<PlaylistDetail>> {
    let playlist = state
        .get_playlists()
        .await?
        .into_iter()
        .find(|playlist| playlist.id == id)
        .ok_or_else(|| ApiError::not_found("playlist not found"))?;

    let by_id: HashMap<String, MediaItem> = state
        .get_media_items()
        .await?
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect();
    let items: Vec<MediaItem> = playlist
        .media_ids
        .iter()
        .filter_map(|media_id| by_id.get(media_id).cloned())
        .collect();
    let media = state.assemble(items, AssembleOptions::summary()).await?;

    Ok(Json(PlaylistDetail { playlist, media }))
}

impl AppState {
    /// Drops cached rows if the database changed and returns the version the
    /// caller's reads belong to.
    async fn ensure_fresh_cache(&self) -> ApiResult<i64> {
        let version = self
            .reader
            .data_version()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;

        let mut last = self.cache.last_db_version.write();
        if let Some(previous) = *last
            && version != previous
        {
            self.cache.clear();
        }
        *last = Some(version);
        Ok(version)
    }

    /// Every media item in catalogue order, memoizing the details map for
    /// follow-up lookups.
    async fn get_media_items(&self) -> ApiResult<Vec<MediaItem>> {
        let version = self.ensure_fresh_cache().await?;
        if let Some(cached) = self.cache.media_items.read().clone() {
            return Ok(cached);
        }

        let items = self
            .reader
            .list_media_items()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;

        self.cache.fill_if_current(version, |cache| {
            cache.media_items.write().replace(items.clone());
            let mut details = cache.media_details.write();
            for item in &items {
                details.insert(item.id.clone(), item.clone());
            }
        });

        Ok(items)
    }

    async fn get_media_item(&self, id: &str) -> ApiResult<MediaItem> {
        let version = self.ensure_fresh_cache().await?;
        if let Some(item) = self.cache.media_details.read().get(id).cloned() {
            return Ok(item);
        }

        let item = self
            .reader
            .get_media_item(id)
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?
            .ok_or_else(|| ApiError::not_found("media item not found"))?;

        self.cache.fill_if_current(version, |cache| {
            cache.media_details.write().insert(id.to_owned(), item.clone());
        });

        Ok(item)
    }

    async fn get_channels(&self) -> ApiResult<Vec<Channel>> {
        let version = self.ensure_fresh_cache().await?;
        if let Some(cached) = self.cache.channels.read().clone() {
            return Ok(cached);
        }

        let channels = self
            .reader
            .list_channels()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;
        self.cache.fill_if_current(version, |cache| {
            cache.channels.write().replace(channels.clone());
        });
        Ok(channels)
    }

    async fn get_playlists(&self) -> ApiResult<Vec<Playlist>> {
        let version = self.ensure_fresh_cache().await?;
        if let Some(cached) = self.cache.playlists.read().clone() {
            return Ok(cached);
        }

        let playlists = self
            .reader
            .list_playlists()
            .await
            .map_err(|err| ApiError::internal(err.to_string()))?;
        self.cache.fill_if_current(version, |cache| {
            cache.playlists.write().replace(playlists.clone());
        });
        Ok(playlists)
    }

    /// Runs the assembler off the async runtime. Items are assembled one after
    /// another and the first platform outage aborts the whole response.
    async fn assemble(
        &self,
        items: Vec<MediaItem>,
        options: AssembleOptions,
    ) -> ApiResult<Vec<MediaRepresentation>> {
        let assembler = self.assembler.clone();
        tokio::task::spawn_blocking(move || {
            items
                .iter()
                .map(|item| assembler.assemble(item, options))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .map_err(ApiError::from)
    }
}
