//! In-process stand-ins for the upstream API, the CDN and the remux tool.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path as UrlPath, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bilistream_core::config::{BilistreamConfig, DownloadConfig, MuxConfig, UpstreamConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

pub const IMG_KEY: &str = "7cd084941338484aae1ad9425b84077c";
pub const SUB_KEY: &str = "4932caff0ff746eab6f01bf08b70ac45";
pub const BVID: &str = "BV1xx411c7mD";
pub const VIDEO_BYTES: &[u8] = b"VIDEO-TRACK-BYTES";
pub const AUDIO_BYTES: &[u8] = b"AUDIO-TRACK-BYTES";

/// One request seen by the fake CDN.
#[derive(Debug, Clone)]
pub struct CdnHit {
    pub name: String,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
    pub accept_encoding: Option<String>,
}

#[derive(Default)]
struct UpstreamState {
    base: String,
    nav_calls: usize,
    play_url_queries: Vec<String>,
    play_url_codes: VecDeque<i64>,
    cdn_files: HashMap<String, Bytes>,
    cdn_hits: Vec<CdnHit>,
}

/// Fake API and CDN served from one loopback listener.
#[derive(Clone)]
pub struct FakeUpstream {
    state: Arc<Mutex<UpstreamState>>,
    addr: SocketAddr,
}

impl FakeUpstream {
    /// Starts a server whose CDN serves `V1` and `A2`.
    ///
    /// The play-address response lists video `V1` with no backups and audio
    /// with an empty primary URL and backup `A2`.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut state = UpstreamState {
            base: format!("http://{addr}"),
            ..Default::default()
        };
        state
            .cdn_files
            .insert("V1".to_string(), Bytes::from_static(VIDEO_BYTES));
        state
            .cdn_files
            .insert("A2".to_string(), Bytes::from_static(AUDIO_BYTES));
        let state = Arc::new(Mutex::new(state));

        let router = Router::new()
            .route("/x/web-interface/nav", get(nav))
            .route("/x/player/pagelist", get(pagelist))
            .route("/x/player/wbi/playurl", get(play_url))
            .route("/cdn/{name}", get(cdn))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { state, addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn cdn_url(&self, name: &str) -> String {
        format!("{}/cdn/{name}", self.base_url())
    }

    /// Business codes returned by the next play-address calls, in order.
    pub fn script_play_url_codes(&self, codes: impl IntoIterator<Item = i64>) {
        self.state.lock().play_url_codes.extend(codes);
    }

    pub fn nav_calls(&self) -> usize {
        self.state.lock().nav_calls
    }

    pub fn play_url_queries(&self) -> Vec<String> {
        self.state.lock().play_url_queries.clone()
    }

    pub fn cdn_hits(&self) -> Vec<CdnHit> {
        self.state.lock().cdn_hits.clone()
    }

    pub fn cdn_hit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cdn_hits().into_iter().map(|hit| hit.name).collect();
        names.sort();
        names
    }

    /// Config pointing the API at this server.
    pub fn config(&self, temp_root: &Path, mux_program: &Path) -> BilistreamConfig {
        BilistreamConfig {
            upstream: UpstreamConfig {
                api_base: self.base_url(),
                api_timeout: Duration::from_secs(5),
                cookie: Some("SESSDATA=test-session".to_string()),
                ..UpstreamConfig::default()
            },
            download: DownloadConfig {
                timeout: Duration::from_secs(10),
                temp_root: Some(temp_root.to_path_buf()),
                ..DownloadConfig::default()
            },
            mux: MuxConfig {
                program: mux_program.to_path_buf(),
                timeout: Some(Duration::from_secs(10)),
            },
            ..BilistreamConfig::default()
        }
    }
}

type SharedState = State<Arc<Mutex<UpstreamState>>>;

async fn nav(State(state): SharedState) -> Json<Value> {
    state.lock().nav_calls += 1;
    Json(json!({
        "code": -101,
        "message": "账号未登录",
        "data": {
            "isLogin": false,
            "wbi_img": {
                "img_url": format!("https://i0.hdslb.com/bfs/wbi/{IMG_KEY}.png"),
                "sub_url": format!("https://i0.hdslb.com/bfs/wbi/{SUB_KEY}.png"),
            }
        }
    }))
}

async fn pagelist(RawQuery(query): RawQuery) -> Json<Value> {
    let query = query.unwrap_or_default();
    if !query.contains("bvid=") && !query.contains("aid=") {
        return Json(json!({"code": -400, "message": "请求错误", "data": null}));
    }
    Json(json!({
        "code": 0,
        "message": "0",
        "data": [
            {"cid": 123, "page": 1, "part": "P1", "duration": 60},
            {"cid": 456, "page": 2, "part": "P2", "duration": 90}
        ]
    }))
}

async fn play_url(State(state): SharedState, RawQuery(query): RawQuery) -> Json<Value> {
    let mut state = state.lock();
    state.play_url_queries.push(query.unwrap_or_default());

    let code = state.play_url_codes.pop_front().unwrap_or(0);
    if code != 0 {
        return Json(json!({"code": code, "message": "rejected", "data": null}));
    }

    let base = state.base.clone();
    Json(json!({
        "code": 0,
        "message": "0",
        "data": {
            "quality": 80,
            "format": "flv",
            "dash": {
                "video": [{
                    "id": 80,
                    "base_url": format!("{base}/cdn/V1"),
                    "backup_url": [],
                    "bandwidth": 1000,
                    "codecs": "avc1.640032"
                }],
                "audio": [{
                    "id": 30280,
                    "base_url": "",
                    "backup_url": [format!("{base}/cdn/A2")],
                    "bandwidth": 100,
                    "codecs": "mp4a.40.2"
                }]
            }
        }
    }))
}

async fn cdn(
    State(state): SharedState,
    UrlPath(name): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let body = {
        let mut state = state.lock();
        state.cdn_hits.push(CdnHit {
            name: name.clone(),
            referer: header("referer"),
            user_agent: header("user-agent"),
            accept_encoding: header("accept-encoding"),
        });
        state.cdn_files.get(&name).cloned()
    };

    if name == "stall" {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    match body {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Writes an executable shell script standing in for ffmpeg.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Remux stand-in concatenating the inputs. Arguments: -y -i V -i A -c copy OUT
#[cfg(unix)]
pub fn concat_muxer(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg",
        r#"[ "$1" = "-version" ] && exit 0
cat "$3" "$5" > "$8""#,
    )
}

/// Remux stand-in that always fails.
#[cfg(unix)]
pub fn failing_muxer(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "broken-ffmpeg",
        "echo 'Could not find tag for codec' >&2\nexit 3",
    )
}

/// Workspace root plus a directory for fake tools.
pub struct Sandbox {
    pub temp_root: TempDir,
    pub tools: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            temp_root: TempDir::new().unwrap(),
            tools: TempDir::new().unwrap(),
        }
    }

    /// Number of entries left in the workspace root.
    pub fn leftovers(&self) -> usize {
        std::fs::read_dir(self.temp_root.path()).unwrap().count()
    }
}
