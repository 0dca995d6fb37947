//! JSON API consumed by the player page, plus the cover and audio proxies.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header::RANGE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use navplay_core::{
    relay, upstream_failure, ByteRange, ItemId, MediaKind, SongRef, SubsonicClient,
    SubsonicClientError, MAX_SONGS,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Batch size when the page does not ask for one.
pub const DEFAULT_RANDOM_SIZE: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<SubsonicClient>,
}

#[derive(Debug, Serialize)]
struct RandomListResponse {
    success: bool,
    songs: Vec<SongRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    success: bool,
    results: Vec<SongRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct PingResponse {
    ok: bool,
    upstream: bool,
}

/// Routes mounted under `/api`. Unknown paths below it are plain 404s so
/// they never fall through to the page.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/random/list", get(random_list))
        .route("/search", get(search))
        .route("/cover/:id", get(cover))
        .route("/stream/:id", get(stream))
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
}

/// Liveness plus a cheap upstream reachability probe.
pub async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    let upstream = match state.client.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("upstream ping failed: {e}");
            false
        }
    };
    Json(PingResponse { ok: true, upstream })
}

/// Parse a song-count parameter, falling back to `default` on garbage and
/// clamping to `1..=MAX_SONGS`.
fn count_param(params: &HashMap<String, String>, key: &str, default: u32) -> u32 {
    params
        .get(key)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
        .clamp(1, MAX_SONGS)
}

/// Short, credential-free reason for a failed upstream call.
fn failure_reason(err: &SubsonicClientError) -> &'static str {
    match err {
        SubsonicClientError::Parse => "Upstream invalid response",
        SubsonicClientError::Server { .. } => "Upstream rejected request",
        _ => "Upstream unavailable",
    }
}

async fn random_list(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let size = count_param(&params, "size", DEFAULT_RANDOM_SIZE);

    match state.client.get_random_songs(size).await {
        Ok(songs) => Json(RandomListResponse {
            success: true,
            songs,
            error: None,
        })
        .into_response(),
        Err(e) => {
            warn!("random list failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(RandomListResponse {
                    success: false,
                    songs: Vec::new(),
                    error: Some(failure_reason(&e)),
                }),
            )
                .into_response()
        }
    }
}

async fn search(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let query = params.get("query").map(|q| q.trim()).unwrap_or_default();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SearchResponse {
                success: false,
                results: Vec::new(),
                error: Some("No query"),
            }),
        )
            .into_response();
    }

    let count = count_param(&params, "songCount", MAX_SONGS);

    match state.client.search_songs(query, count).await {
        Ok(results) => Json(SearchResponse {
            success: true,
            results,
            error: None,
        })
        .into_response(),
        Err(e) => {
            warn!("search failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(SearchResponse {
                    success: false,
                    results: Vec::new(),
                    error: Some(failure_reason(&e)),
                }),
            )
                .into_response()
        }
    }
}

fn parse_id(raw: &str) -> Result<ItemId, Response> {
    ItemId::parse(raw).map_err(|e| {
        debug!("rejected id {raw:?}: {e}");
        (StatusCode::BAD_REQUEST, format!("Invalid id: {e}")).into_response()
    })
}

async fn cover(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.client.cover_art(&id).await {
        Ok(upstream) => relay(upstream, MediaKind::Cover).await,
        Err(e) => upstream_failure(&e),
    }
}

async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let range = headers.get(RANGE);
    if let Some(raw) = range {
        match raw.to_str().ok().map(|r| (r, ByteRange::parse(r))) {
            Some((_, Some(parsed))) => debug!("song {id}: forwarding {parsed}"),
            Some((text, None)) => debug!("song {id}: forwarding unparsed range {text:?}"),
            None => debug!("song {id}: forwarding non-text range {raw:?}"),
        }
    }

    info!("Streaming request for song ID: {}", id);

    match state.client.download(&id, range).await {
        Ok(upstream) => relay(upstream, MediaKind::Audio).await,
        Err(e) => upstream_failure(&e),
    }
}
