//! Scripted `Fetch` double shared by resolver, registry and downloader tests.

use crate::net::{Fetch, FetchError, FetchResponse, MediaStream, RequestSpec};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum FakeReply {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    Error(FetchError),
    /// Streams the given chunks, then fails.
    BrokenStream(Vec<Bytes>),
    /// Streams the given chunks, then never finishes.
    StalledStream(Vec<Bytes>),
}

impl FakeReply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        FakeReply::Response {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn redirect(location: &str) -> Self {
        FakeReply::Response {
            status: 302,
            headers: vec![("location".to_string(), location.to_string())],
            body: Bytes::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        FakeReply::Response {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }
}

struct Route {
    prefix: String,
    reply: FakeReply,
    once: bool,
}

#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RequestSpec>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request whose URL starts with `prefix`.
    pub fn route(self, prefix: &str, reply: FakeReply) -> Self {
        self.push(prefix, reply, false);
        self
    }

    /// Answer the next matching request only. Checked before permanent routes
    /// registered later, so a failure can be injected ahead of a success.
    pub fn route_once(self, prefix: &str, reply: FakeReply) -> Self {
        self.push(prefix, reply, true);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(&self, prefix: &str, reply: FakeReply, once: bool) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                prefix: prefix.to_string(),
                reply,
                once,
            });
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    async fn next_reply(&self, request: &RequestSpec) -> FakeReply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut routes = match self.routes.lock() {
            Ok(routes) => routes,
            Err(_) => return FakeReply::status(500),
        };
        let Some(index) = routes.iter().position(|r| request.url.starts_with(&r.prefix)) else {
            return FakeReply::status(404);
        };
        if routes[index].once {
            routes.remove(index).reply
        } else {
            routes[index].reply.clone()
        }
    }
}

fn chunked(body: &Bytes) -> Vec<Result<Bytes, FetchError>> {
    body.chunks(4)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn fetch(&self, request: &RequestSpec) -> Result<FetchResponse, FetchError> {
        match self.next_reply(request).await {
            FakeReply::Response { status, .. } if status >= 400 => Err(FetchError::HttpStatus(status)),
            FakeReply::Response {
                status,
                headers,
                body,
            } => Ok(FetchResponse {
                status,
                url: request.url.clone(),
                headers: headers
                    .into_iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v))
                    .collect::<HashMap<_, _>>(),
                body,
            }),
            FakeReply::Error(e) => Err(e),
            FakeReply::BrokenStream(_) | FakeReply::StalledStream(_) => {
                Err(FetchError::InvalidRequest("stream-only route".to_string()))
            }
        }
    }

    async fn stream(&self, request: &RequestSpec) -> Result<MediaStream, FetchError> {
        let mut current = request.clone();
        for _ in 0..=self.max_redirects() {
            match self.next_reply(&current).await {
                FakeReply::Response {
                    status, headers, ..
                } if (300..400).contains(&status) => {
                    let location = headers
                        .into_iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("location"))
                        .map(|(_, v)| v)
                        .ok_or(FetchError::HttpStatus(status))?;
                    current = current.redirected(location);
                }
                FakeReply::Response { status, .. } if status >= 400 => {
                    return Err(FetchError::HttpStatus(status))
                }
                FakeReply::Response { body, .. } => {
                    return Ok(MediaStream {
                        content_length: Some(body.len() as u64),
                        chunks: stream::iter(chunked(&body)).boxed(),
                    })
                }
                FakeReply::Error(e) => return Err(e),
                FakeReply::BrokenStream(chunks) => {
                    let failing = stream::iter(chunks.into_iter().map(Ok)).chain(stream::once(
                        async { Err(FetchError::ConnectionFailed("connection reset".to_string())) },
                    ));
                    return Ok(MediaStream {
                        content_length: None,
                        chunks: failing.boxed(),
                    });
                }
                FakeReply::StalledStream(chunks) => {
                    let stalled = stream::iter(chunks.into_iter().map(Ok)).chain(stream::pending());
                    return Ok(MediaStream {
                        content_length: None,
                        chunks: stalled.boxed(),
                    });
                }
            }
        }
        Err(FetchError::TooManyRedirects(self.max_redirects()))
    }
}

const BILIBILI_PLAYURL: &str = "https://api.bilibili.com/x/player/wbi/playurl?bvid=BV1L9Uoa9EUx&cid=1234567";

/// Bilibili view, nav and playurl answers for BV1L9Uoa9EUx.
pub fn bilibili_fetcher() -> FakeFetcher {
    bilibili_fetcher_with_dash(FakeReply::json(json!({
        "code": 0,
        "data": {
            "quality": 80,
            "dash": {
                "video": [{"id": 80, "baseUrl": "https://upos.bilivideo.com/video-1080.m4s", "bandwidth": 2100000}],
                "audio": [
                    {"baseUrl": "https://upos.bilivideo.com/audio-64k.m4s", "bandwidth": 64000},
                    {"baseUrl": "https://upos.bilivideo.com/audio-192k.m4s", "bandwidth": 192000}
                ]
            }
        }
    })))
}

/// Same as [`bilibili_fetcher`], with `dash` answering the `fnval=16` playurl.
pub fn bilibili_fetcher_with_dash(dash: FakeReply) -> FakeFetcher {
    FakeFetcher::new()
        .route(
            "https://api.bilibili.com/x/web-interface/view",
            FakeReply::json(json!({
                "code": 0,
                "message": "0",
                "data": {
                    "bvid": "BV1L9Uoa9EUx",
                    "title": "【4K】城市延时摄影",
                    "pic": "http://i0.hdslb.com/bfs/archive/cover.jpg",
                    "duration": 212,
                    "cid": 1234567,
                    "owner": {"mid": 1, "name": "摄影师"}
                }
            })),
        )
        .route(
            "https://api.bilibili.com/x/web-interface/nav",
            FakeReply::json(json!({
                "code": -101,
                "message": "账号未登录",
                "data": {"wbi_img": {
                    "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                    "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
                }}
            })),
        )
        .route(
            &format!("{}&fnval=1&", BILIBILI_PLAYURL),
            FakeReply::json(json!({
                "code": 0,
                "data": {
                    "quality": 80,
                    "durl": [{
                        "url": "https://upos-sz-mirrorcos.bilivideo.com/main.mp4",
                        "backup_url": ["http://upos-hz-mirrorakam.akamaized.net/backup.mp4"]
                    }]
                }
            })),
        )
        .route(&format!("{}&fnval=16&", BILIBILI_PLAYURL), dash)
}

/// Douyin share page carrying one watermarked item for `video_id`.
pub fn douyin_share_page(video_id: &str) -> String {
    let data = json!({
        "loaderData": {
            "video_(id)/page": {
                "videoInfoRes": {
                    "item_list": [{
                        "aweme_id": video_id,
                        "desc": "城市夜景 #vlog",
                        "author": {"nickname": "小王"},
                        "video": {
                            "play_addr": {"url_list": [
                                format!("http://aweme.snssdk.com/aweme/v1/playwm/?video_id=v0{}", video_id)
                            ]},
                            "cover": {"url_list": ["https://p3.douyinpic.com/cover.jpeg"]},
                            "duration": 15300,
                            "height": 1920
                        }
                    }]
                }
            }
        }
    });
    format!(
        "<html><script>window._ROUTER_DATA = {}</script></html>",
        data
    )
}
