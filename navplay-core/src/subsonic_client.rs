use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::auth::auth_params;
use crate::config::UpstreamConfig;
use crate::ids::ItemId;
use crate::models::{ClientSong, SongRef};

/// Hard cap on songs per random or search call.
pub const MAX_SONGS: u32 = 25;

/// Budget for the small JSON calls. Media calls have none so long
/// transfers are not cut off.
const JSON_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for the Subsonic-compatible upstream (Navidrome).
pub struct SubsonicClient {
    config: Arc<UpstreamConfig>,
    http: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum SubsonicClientError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(StatusCode),
    #[error("server error (code {code}): {message}")]
    Server { code: u32, message: String },
    #[error("unexpected response format")]
    Parse,
    #[error("search query is empty")]
    EmptyQuery,
    #[error("failed to build HTTP client: {0}")]
    Builder(reqwest::Error),
}

// The request URL carries the auth query, so it never rides along in the error.
impl From<reqwest::Error> for SubsonicClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

// -- Response envelope types --

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseEnvelope {
    #[serde(rename = "subsonic-response")]
    pub(crate) subsonic_response: ResponseInner,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseInner {
    pub(crate) status: String,
    #[allow(dead_code)]
    pub(crate) version: Option<String>,
    #[serde(flatten)]
    pub(crate) data: serde_json::Value,
}

impl ResponseEnvelope {
    /// Unwrap the envelope, turning `status: "failed"` into a server error.
    pub(crate) fn into_data(self) -> Result<serde_json::Value, SubsonicClientError> {
        let inner = self.subsonic_response;

        if inner.status != "ok" {
            let error = inner.data.get("error");
            let code = error
                .and_then(|e| e.get("code"))
                .and_then(|c| c.as_u64())
                .unwrap_or(0) as u32;
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(SubsonicClientError::Server { code, message });
        }

        Ok(inner.data)
    }
}

impl SubsonicClient {
    pub fn new(config: Arc<UpstreamConfig>) -> Result<Self, SubsonicClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(format!("{}/{}", config.client_name, env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SubsonicClientError::Builder)?;

        Ok(Self { config, http })
    }

    /// Build a full URL with the Subsonic auth query params.
    fn build_url(&self, endpoint: &str, extra_params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/rest/{}?", self.config.base_url, endpoint);

        let auth = auth_params(&self.config);
        let pairs = auth
            .iter()
            .map(|(k, v)| (*k, v.as_str()))
            .chain(extra_params.iter().copied());

        for (i, (key, value)) in pairs.enumerate() {
            if i > 0 {
                url.push('&');
            }
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }

        url
    }

    /// Fetch a URL and parse the Subsonic response envelope, returning the inner data.
    async fn request(&self, url: &str) -> Result<serde_json::Value, SubsonicClientError> {
        let resp = self.http.get(url).timeout(JSON_TIMEOUT).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SubsonicClientError::Status(status));
        }

        let body = resp.bytes().await?;
        let envelope: ResponseEnvelope =
            serde_json::from_slice(&body).map_err(|_| SubsonicClientError::Parse)?;
        envelope.into_data()
    }

    pub async fn ping(&self) -> Result<(), SubsonicClientError> {
        let url = self.build_url("ping", &[]);
        self.request(&url).await?;
        Ok(())
    }

    /// Random songs from the whole library. `size` is clamped to `1..=MAX_SONGS`.
    pub async fn get_random_songs(&self, size: u32) -> Result<Vec<SongRef>, SubsonicClientError> {
        let size_str = clamp_count(size).to_string();
        let url = self.build_url("getRandomSongs", &[("size", &size_str)]);
        let data = self.request(&url).await?;

        // Response: {"randomSongs": {"song": [...]}}
        let songs = songs_in(data.get("randomSongs"))?;
        debug!("upstream returned {} random songs", songs.len());
        Ok(songs)
    }

    /// Song-only `search3` query, in upstream relevance order.
    pub async fn search_songs(
        &self,
        query: &str,
        count: u32,
    ) -> Result<Vec<SongRef>, SubsonicClientError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SubsonicClientError::EmptyQuery);
        }

        let count = clamp_count(count);
        let count_str = count.to_string();
        let url = self.build_url(
            "search3",
            &[
                ("query", query),
                ("songCount", &count_str),
                ("albumCount", "0"),
                ("artistCount", "0"),
            ],
        );
        let data = self.request(&url).await?;

        // Response: {"searchResult3": {"song": [...]}}, "song" omitted when nothing matched.
        let mut songs = songs_in(data.get("searchResult3"))?;
        songs.truncate(count as usize);
        Ok(songs)
    }

    /// Start a cover art download. The body is left unread for streaming.
    pub async fn cover_art(&self, id: &ItemId) -> Result<reqwest::Response, SubsonicClientError> {
        let url = self.build_url("getCoverArt", &[("id", id.as_str())]);
        Ok(self.http.get(url).send().await?)
    }

    /// Start an original-file download, forwarding the client's `Range` header verbatim.
    ///
    /// Uses `download` rather than `stream` because it serves the stored file
    /// as-is, which is what makes byte ranges work.
    pub async fn download(
        &self,
        id: &ItemId,
        range: Option<&HeaderValue>,
    ) -> Result<reqwest::Response, SubsonicClientError> {
        let url = self.build_url("download", &[("id", id.as_str())]);
        let mut req = self.http.get(url);
        if let Some(range) = range {
            req = req.header(RANGE, range.clone());
        }
        Ok(req.send().await?)
    }
}

fn clamp_count(n: u32) -> u32 {
    n.clamp(1, MAX_SONGS)
}

/// Extract the `song` list of a container object.
///
/// Missing container or key means no songs. Some servers collapse a
/// one-element list into a bare object, so that is accepted too.
/// Entries that do not deserialize are skipped.
fn songs_in(container: Option<&serde_json::Value>) -> Result<Vec<SongRef>, SubsonicClientError> {
    let raw = match container.and_then(|c| c.get("song")) {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(obj @ serde_json::Value::Object(_)) => vec![obj.clone()],
        Some(other) => {
            warn!("unexpected song list type: {other}");
            return Err(SubsonicClientError::Parse);
        }
    };

    let mut songs = Vec::with_capacity(raw.len());
    for value in raw {
        let song: ClientSong = match serde_json::from_value(value) {
            Ok(song) => song,
            Err(e) => {
                warn!("skipping malformed song entry: {e}");
                continue;
            }
        };
        if let Some(song) = song.into_song_ref() {
            songs.push(song);
        }
    }
    Ok(songs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::md5_hex;
    use crate::config::RawUpstreamConfig;
    use std::collections::HashMap;
    use crate::config::AuthMode;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server_url: &str) -> SubsonicClient {
        let config = RawUpstreamConfig {
            url: Some(server_url.into()),
            user: Some("admin".into()),
            password: Some("pass".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        SubsonicClient::new(Arc::new(config)).unwrap()
    }

    fn query_map(url: &str) -> HashMap<String, String> {
        url.split_once('?')
            .unwrap()
            .1
            .split('&')
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((k.to_string(), v.to_string()))
            })
            .collect()
    }

    fn wrap_ok(extra: serde_json::Value) -> serde_json::Value {
        let mut inner = serde_json::json!({
            "status": "ok",
            "version": "1.16.1",
            "type": "navidrome",
            "serverVersion": "0.52.0"
        });
        if let (Some(base), Some(ext)) = (inner.as_object_mut(), extra.as_object()) {
            for (k, v) in ext {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::json!({ "subsonic-response": inner })
    }

    #[test]
    fn build_url_has_correct_structure() {
        let client = client("http://localhost:4533");
        let url = client.build_url("ping", &[]);

        assert!(url.starts_with("http://localhost:4533/rest/ping?"));
        let params = query_map(&url);
        assert_eq!(params["u"], "admin");
        assert_eq!(params["v"], "1.16.1");
        assert_eq!(params["c"], "navplay");
        assert_eq!(params["f"], "json");
        assert_eq!(params["t"], md5_hex(&format!("pass{}", params["s"])));
    }

    #[test]
    fn build_url_encodes_special_characters() {
        let client = client("http://localhost:4533/");
        let url = client.build_url("search3", &[("query", "hello world & more")]);

        assert!(url.starts_with("http://localhost:4533/rest/search3?"));
        assert!(url.contains("query=hello%20world%20%26%20more"));
    }

    #[test]
    fn envelope_failure_becomes_server_error() {
        let envelope: ResponseEnvelope = serde_json::from_value(serde_json::json!({
            "subsonic-response": {
                "status": "failed",
                "version": "1.16.1",
                "error": { "code": 40, "message": "Wrong username or password" }
            }
        }))
        .unwrap();

        match envelope.into_data().unwrap_err() {
            SubsonicClientError::Server { code, message } => {
                assert_eq!(code, 40);
                assert_eq!(message, "Wrong username or password");
            }
            other => panic!("expected Server error, got {:?}", other),
        }
    }

    #[test]
    fn songs_in_accepts_array_object_and_missing() {
        let list = serde_json::json!({ "song": [
            { "id": "s1", "title": "One", "artist": "A", "coverArt": "c1" },
            { "title": "no id" },
            { "id": "s2" }
        ]});
        let songs = songs_in(Some(&list)).unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].id, "s1");
        assert_eq!(songs[1].cover_art, "s2");

        let single = serde_json::json!({ "song": { "id": "s9", "title": "Solo" } });
        assert_eq!(songs_in(Some(&single)).unwrap()[0].title, "Solo");

        assert!(songs_in(Some(&serde_json::json!({}))).unwrap().is_empty());
        assert!(songs_in(None).unwrap().is_empty());
    }

    #[test]
    fn songs_in_rejects_malformed_payload() {
        let bad = serde_json::json!({ "song": "nope" });
        assert!(matches!(
            songs_in(Some(&bad)),
            Err(SubsonicClientError::Parse)
        ));

    }

    #[test]
    fn songs_in_skips_entries_that_do_not_deserialize() {
        let data = serde_json::json!({
            "song": [
                { "id": 42, "title": "Numeric id" },
                { "id": "s1", "title": { "nested": true } },
                { "id": "s2", "title": "Fine", "artist": "Band" }
            ]
        });

        let songs = songs_in(Some(&data)).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].id, "s2");
        assert_eq!(songs[0].title, "Fine");
    }

    #[test]
    fn clamp_count_bounds() {
        assert_eq!(clamp_count(0), 1);
        assert_eq!(clamp_count(10), 10);
        assert_eq!(clamp_count(25), 25);
        assert_eq!(clamp_count(500), 25);
    }

    #[tokio::test]
    async fn random_songs_clamps_size_and_maps_songs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/getRandomSongs"))
            .and(query_param("size", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(wrap_ok(serde_json::json!({
                "randomSongs": { "song": [
                    { "id": "s1", "title": "One", "artist": "A", "coverArt": "al-1" },
                    { "id": "s2", "title": "Two" }
                ]}
            }))))
            .expect(1)
            .mount(&server)
            .await;

        let songs = client(&server.uri()).get_random_songs(100).await.unwrap();
        assert_eq!(songs.len(), 2);
        assert_eq!(songs[1].artist, "Unknown");
        assert_eq!(songs[1].cover_art, "s2");
    }

    #[tokio::test]
    async fn search_requests_songs_only_and_truncates() {
        let server = MockServer::start().await;
        let many: Vec<_> = (0..40)
            .map(|i| serde_json::json!({ "id": format!("s{i}"), "title": format!("T{i}") }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/rest/search3"))
            .and(query_param("query", "love"))
            .and(query_param("songCount", "25"))
            .and(query_param("albumCount", "0"))
            .and(query_param("artistCount", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(wrap_ok(
                serde_json::json!({ "searchResult3": { "song": many } }),
            )))
            .mount(&server)
            .await;

        let songs = client(&server.uri())
            .search_songs("  love ", 25)
            .await
            .unwrap();
        assert_eq!(songs.len(), 25);
        assert_eq!(songs[0].id, "s0");
        assert_eq!(songs[24].id, "s24");
    }

    #[tokio::test]
    async fn search_with_blank_query_never_calls_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .search_songs("   ", 25)
            .await
            .unwrap_err();
        assert!(matches!(err, SubsonicClientError::EmptyQuery));
    }

    #[tokio::test]
    async fn non_success_status_and_bad_json_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/getRandomSongs"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        assert!(matches!(
            client.get_random_songs(5).await,
            Err(SubsonicClientError::Status(status)) if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(matches!(
            client.ping().await,
            Err(SubsonicClientError::Parse)
        ));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_http_error() {
        // Nothing listens on port 1.
        let client = client("http://127.0.0.1:1");
        assert!(matches!(
            client.get_random_songs(5).await,
            Err(SubsonicClientError::Http(_))
        ));
    }

    #[tokio::test]
    async fn download_forwards_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/download"))
            .and(query_param("id", "s1"))
            .and(header("range", "bytes=0-1"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"ID".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let id = ItemId::parse("s1").unwrap();
        let resp = client(&server.uri())
            .download(&id, Some(&HeaderValue::from_static("bytes=0-1")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[tokio::test]
    async fn download_forwards_non_ascii_range_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/download"))
            .and(header_exists("range"))
            .respond_with(ResponseTemplate::new(416))
            .expect(1)
            .mount(&server)
            .await;

        let raw = HeaderValue::from_bytes(b"bytes=0-1;\xe9").unwrap();
        let id = ItemId::parse("s1").unwrap();
        let resp = client(&server.uri()).download(&id, Some(&raw)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            requests[0].headers.get("range").unwrap().as_bytes(),
            b"bytes=0-1;\xe9"
        );
    }

    fn assert_no_credentials(text: &str, secrets: &[&str]) {
        for secret in secrets {
            assert!(!text.contains(secret), "{secret:?} found in {text:?}");
        }
        for key in ["u=", "t=", "s=", "p="] {
            assert!(!text.contains(key), "auth parameter {key:?} found in {text:?}");
        }
    }

    #[tokio::test]
    async fn transport_errors_do_not_carry_password() {
        let config = RawUpstreamConfig {
            url: Some("http://127.0.0.1:1".into()),
            user: Some("admin".into()),
            password: Some("hunter2".into()),
            auth_mode: Some("password".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.auth_mode, AuthMode::Password);
        let client = SubsonicClient::new(Arc::new(config)).unwrap();

        let err = client.get_random_songs(5).await.unwrap_err();
        assert!(matches!(err, SubsonicClientError::Http(_)));

        let id = ItemId::parse("s1").unwrap();
        let download_err = client.download(&id, None).await.unwrap_err();
        let cover_err = client.cover_art(&id).await.unwrap_err();

        for text in [
            format!("random list failed: {err}"),
            download_err.to_string(),
            cover_err.to_string(),
        ] {
            assert_no_credentials(&text, &["hunter2", &hex::encode("hunter2"), "enc:", "enc%3A"]);
        }
    }

    #[tokio::test]
    async fn transport_errors_do_not_carry_token() {
        let config = RawUpstreamConfig {
            url: Some("http://127.0.0.1:1".into()),
            user: Some("admin".into()),
            token: Some("26719a1196d2a940705a59634eb18eab".into()),
            salt: Some("c19b2d".into()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        let client = SubsonicClient::new(Arc::new(config)).unwrap();

        let err = client.search_songs("beatles", 10).await.unwrap_err();
        assert_no_credentials(
            &format!("search failed: {err}"),
            &["26719a1196d2a940705a59634eb18eab", "c19b2d", "beatles"],
        );
    }
}
