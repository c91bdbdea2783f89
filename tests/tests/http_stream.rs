#![forbid(unsafe_code)]

//! End-to-end scenarios for `HttpDataStream` against a local HTTP server.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use aulos_cache::{cache_for, CacheId};
use aulos_stream::{HttpDataStream, OpenFlags, StreamEnv, StreamState, REMOTE_TRACK_PREFIX};
use axum::{
    body::Body,
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::StreamExt as _;
use tempfile::TempDir;
use tokio::net::TcpListener;

const TRACK_LEN: usize = 300_000;
const SLOW_HEAD_LEN: usize = 65_536;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn body_response(body: Vec<u8>, content_type: &str) -> Response {
    Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .body(Body::from(body))
        .unwrap()
}

async fn track() -> Response {
    body_response(pattern(TRACK_LEN), "audio/mpeg")
}

async fn tiny() -> Response {
    body_response(pattern(1024), "audio/mpeg")
}

async fn auth(headers: HeaderMap) -> Response {
    // base64("default:pw")
    let expected = "Basic ZGVmYXVsdDpwdw==";
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => body_response(pattern(2048), "audio/flac"),
        _ => Response::builder()
            .status(401)
            .body(Body::empty())
            .unwrap(),
    }
}

async fn error500() -> Response {
    Response::builder()
        .status(500)
        .body(Body::empty())
        .unwrap()
}

/// Sends the head of a body, then stalls forever.
async fn slow() -> Response {
    let head = Bytes::from(pattern(SLOW_HEAD_LEN));
    let stream = futures::stream::iter([Ok::<_, std::convert::Infallible>(head)])
        .chain(futures::stream::pending());

    Response::builder()
        .status(200)
        .header("Content-Type", "audio/mpeg")
        .body(Body::from_stream(stream))
        .unwrap()
}

fn test_app() -> Router {
    let flaky_hits = Arc::new(AtomicUsize::new(0));

    Router::new()
        .route("/track.mp3", get(track))
        .route("/tiny.mp3", get(tiny))
        .route("/a.mp3", get(tiny))
        .route("/b.mp3", get(tiny))
        .route("/c.mp3", get(tiny))
        .route("/auth.flac", get(auth))
        .route("/error500", get(error500))
        .route("/slow.mp3", get(slow))
        .route(
            "/flaky.mp3",
            get(move || {
                let hits = Arc::clone(&flaky_hits);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        error500().await
                    } else {
                        tiny().await
                    }
                }
            }),
        )
}

struct TestServer {
    addr: String,
    _runtime: tokio::runtime::Runtime,
}

fn spawn_server() -> TestServer {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let addr = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

    runtime.spawn(async move {
        axum::serve(listener, test_app()).await.unwrap();
    });

    TestServer {
        addr,
        _runtime: runtime,
    }
}

fn stream_env(dir: &TempDir) -> StreamEnv {
    StreamEnv::new(dir.path())
}

/// Environment for the stalled-transfer tests: the smallest legal pre-cache
/// threshold so `open` returns while the transfer is still alive, and a
/// short read timeout so `close` never waits long on a stalled connection.
fn slow_env(dir: &TempDir) -> StreamEnv {
    let mut env = StreamEnv::new(dir.path());
    env.settings.precache_bytes = 32_768;
    env.settings.chunk_bytes = 32_768;
    env.net.read_timeout = Some(Duration::from_secs(1));
    env
}

fn read_all(stream: &HttpDataStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 16_384];
    loop {
        let n = stream.read(&mut buf);
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn cold_hit_then_warm_hit_round_trips_the_body() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);
    let uri = format!("{}/track.mp3", server.addr);
    let id = CacheId::from_uri(&uri);

    {
        let mut stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();

        // The body is smaller than the pre-cache threshold, so open only
        // returned once the transfer finished.
        assert_eq!(stream.state(), StreamState::Finished);
        assert_eq!(stream.length(), TRACK_LEN as u64);
        assert_eq!(stream.content_type().as_deref(), Some("audio/mpeg"));
        assert_eq!(stream.uri(), uri);
        assert!(stream.seekable());
        assert!(stream.can_prefetch());

        let body = read_all(&stream);
        assert_eq!(body, pattern(TRACK_LEN));
        assert!(stream.eof());

        assert!(stream.close());
        assert_eq!(stream.read(&mut [0u8; 8]), 0);
    }

    let cache = cache_for(dir.path(), 35).unwrap();
    assert!(cache.cached(id));

    // The server is gone; a warm hit must not touch the network.
    drop(server);

    let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
    assert_eq!(stream.state(), StreamState::Cached);
    assert_eq!(stream.length(), TRACK_LEN as u64);
    assert_eq!(stream.content_type().as_deref(), Some("audio/mpeg"));
    assert_eq!(read_all(&stream), pattern(TRACK_LEN));
}

#[test]
fn small_body_completes_before_open_returns() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);
    let uri = format!("{}/tiny.mp3", server.addr);

    let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ | OpenFlags::PREFETCH).unwrap();
    assert_eq!(stream.state(), StreamState::Finished);

    let body = read_all(&stream);
    assert_eq!(body, pattern(1024));
    assert!(stream.eof());
}

#[test]
fn seeking_within_a_finalized_body_works() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);
    let uri = format!("{}/track.mp3", server.addr);

    let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
    let expected = pattern(TRACK_LEN);

    assert!(stream.set_position(100_000));
    let mut buf = vec![0u8; 16];
    assert_eq!(stream.read(&mut buf), 16);
    assert_eq!(buf, expected[100_000..100_016]);
    assert_eq!(stream.position(), 100_016);

    // Seek to exactly the end: valid position, immediate EOF.
    assert!(stream.set_position(TRACK_LEN as u64));
    assert_eq!(stream.read(&mut buf), 0);
    assert!(stream.eof());
}

#[test]
fn write_flag_is_rejected() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);
    let uri = format!("{}/tiny.mp3", server.addr);

    let result = HttpDataStream::open(&env, &uri, OpenFlags::READ | OpenFlags::WRITE);
    assert!(result.is_err());
}

#[test]
fn envelope_resolves_credentials_type_and_display_uri() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);

    let raw = format!(
        "{REMOTE_TRACK_PREFIX}{{\"uri\":\"{}/auth.flac\",\"originalUri\":\"lib://x\",\"type\":\".flac\",\"password\":\"pw\"}}",
        server.addr
    );

    let stream = HttpDataStream::open(&env, &raw, OpenFlags::READ).unwrap();
    assert_eq!(stream.state(), StreamState::Finished);
    assert_eq!(stream.uri(), "lib://x");
    // The envelope type wins over the Content-Type header.
    assert_eq!(stream.content_type().as_deref(), Some(".flac"));
    assert_eq!(read_all(&stream), pattern(2048));
    drop(stream);

    // Cached under the transfer URI, not the display URI.
    let cache = cache_for(dir.path(), 35).unwrap();
    assert!(cache.cached(CacheId::from_uri(&format!("{}/auth.flac", server.addr))));

    let warm = HttpDataStream::open(&env, &raw, OpenFlags::READ).unwrap();
    assert_eq!(warm.state(), StreamState::Cached);
    assert_eq!(warm.content_type().as_deref(), Some(".flac"));
}

#[test]
fn malformed_envelope_fails_without_cache_state() {
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);

    let raw = format!("{REMOTE_TRACK_PREFIX}not json");
    assert!(HttpDataStream::open(&env, &raw, OpenFlags::READ).is_err());

    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn transfer_failure_leaves_no_cache_entry_and_retries_cleanly() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = stream_env(&dir);
    let uri = format!("{}/flaky.mp3", server.addr);
    let id = CacheId::from_uri(&uri);

    {
        // First attempt: the server answers 500. Open still succeeds; reads
        // observe an empty terminated stream.
        let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
        assert_eq!(stream.state(), StreamState::Error);
        assert_eq!(stream.read(&mut [0u8; 64]), 0);
        assert!(stream.eof());
    }

    let cache = cache_for(dir.path(), 35).unwrap();
    assert!(!cache.cached(id));

    // Second attempt re-downloads from scratch.
    let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
    assert_eq!(stream.state(), StreamState::Finished);
    assert_eq!(read_all(&stream), pattern(1024));
    drop(stream);
    assert!(cache.cached(id));
}

#[test]
fn precache_gate_opens_mid_transfer_and_serves_arrived_bytes() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = slow_env(&dir);
    let uri = format!("{}/slow.mp3", server.addr);
    let id = CacheId::from_uri(&uri);

    let mut stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
    // The transfer is stalled after its head; open returned on the
    // pre-cache signal, not on completion.
    assert_eq!(stream.state(), StreamState::Loading);

    let mut buf = vec![0u8; SLOW_HEAD_LEN];
    let mut filled = 0;
    while filled < SLOW_HEAD_LEN {
        let n = stream.read(&mut buf[filled..]);
        assert!(n > 0, "arrived bytes must be readable");
        filled += n;
    }
    assert_eq!(buf, pattern(SLOW_HEAD_LEN));

    stream.interrupt();
    assert!(stream.close());
    drop(stream);

    // An aborted load never pollutes the cache.
    let cache = cache_for(dir.path(), 35).unwrap();
    assert!(!cache.cached(id));
}

#[test]
fn seek_ahead_of_download_front_blocks_until_interrupt() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let env = slow_env(&dir);
    let uri = format!("{}/slow.mp3", server.addr);

    let stream = Arc::new(HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap());

    // `set_position` far past the arrived head must block.
    let worker = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || stream.set_position(5_000_000))
    };

    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    stream.interrupt();

    assert!(!worker.join().unwrap());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn eviction_keeps_only_the_most_recent_tracks() {
    let server = spawn_server();
    let dir = TempDir::new().unwrap();
    let mut env = stream_env(&dir);
    env.settings.max_cache_files = 2;

    for track in ["a", "b", "c"] {
        let uri = format!("{}/{track}.mp3", server.addr);
        let stream = HttpDataStream::open(&env, &uri, OpenFlags::READ).unwrap();
        assert_eq!(read_all(&stream).len(), 1024);
    }

    let cache = cache_for(dir.path(), 2).unwrap();
    assert!(!cache.cached(CacheId::from_uri(&format!("{}/a.mp3", server.addr))));
    assert!(cache.cached(CacheId::from_uri(&format!("{}/b.mp3", server.addr))));
    assert!(cache.cached(CacheId::from_uri(&format!("{}/c.mp3", server.addr))));
}
