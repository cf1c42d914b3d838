//! Integration tests for the passthrough endpoints: `/stream`, `/image`, `/health`.

mod common;

use std::time::{Duration, Instant};

use common::{gateway, Script, TestHarness};
use streamrelay::relay::manifest::encode_query_value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MANIFEST: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"keys/k1.bin\"\n\
#EXTINF:10.0,\n\
seg-1.ts\n\
#EXTINF:10.0,\n\
https://cdn.example.com/abs/seg-2.ts\n\
#EXT-X-ENDLIST\n";

fn binary_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Manifest rewriting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manifest_uris_route_back_through_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/live/chan/index.m3u8"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(MANIFEST),
        )
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let origin = format!("{}/live/chan/index.m3u8", upstream.uri());

    let resp = reqwest::get(gateway(addr, "/stream", &origin)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(resp.headers()["cache-control"], "no-cache");

    let body = resp.text().await.unwrap();
    assert_eq!(body.lines().count(), MANIFEST.lines().count());

    let stream = format!("http://{addr}/stream?url=");
    let segment = format!("{}/live/chan/seg-1.ts", upstream.uri());
    let key = format!("{}/live/chan/keys/k1.bin", upstream.uri());

    assert!(body.contains(&format!("{stream}{}", encode_query_value(&segment))));
    assert!(body.contains(&format!(
        "URI=\"{stream}{}\"",
        encode_query_value(&key)
    )));
    assert!(body.contains(&format!(
        "{stream}{}",
        encode_query_value("https://cdn.example.com/abs/seg-2.ts")
    )));
    assert!(body.contains("#EXTINF:10.0,"));
    assert!(body.contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn manifest_resolves_against_redirect_target() {
    let upstream = MockServer::start().await;
    Mock::given(path("/a/index.m3u8"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/b/c/real.m3u8"))
        .mount(&upstream)
        .await;
    Mock::given(path("/b/c/real.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg.ts"))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/a/index.m3u8", upstream.uri())))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let rewritten = body.lines().nth(1).unwrap();
    let decoded = url::Url::parse(rewritten)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert_eq!(decoded, format!("{}/b/c/seg.ts", upstream.uri()));
}

#[tokio::test]
async fn manifest_detected_by_body_not_content_type() {
    let upstream = MockServer::start().await;
    Mock::given(path("/get.php"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "#EXTM3U\n#EXTINF:-1,Channel\nhttp://other.example/1.ts\n",
                "application/octet-stream",
            ),
        )
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/get.php", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(
        resp.headers()["content-type"],
        "application/vnd.apple.mpegurl"
    );
    let body = resp.text().await.unwrap();
    assert!(body.contains(&encode_query_value("http://other.example/1.ts")));
}

#[tokio::test]
async fn public_url_overrides_host_in_rewritten_manifest() {
    let upstream = MockServer::start().await;
    Mock::given(path("/a.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg.ts\n"))
        .mount(&upstream)
        .await;

    let mut config = common::test_config();
    config.server.public_url = Some("https://tv.example.com/".into());
    let (_h, addr) = TestHarness::with_server_config(config, Script::Emit(Vec::new())).await;

    let body = reqwest::get(gateway(addr, "/stream", &format!("{}/a.m3u8", upstream.uri())))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("https://tv.example.com/stream?url="));
}

#[tokio::test]
async fn forwarded_proto_is_honoured() {
    let upstream = MockServer::start().await;
    Mock::given(path("/a.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg.ts\n"))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let body = reqwest::Client::new()
        .get(gateway(addr, "/stream", &format!("{}/a.m3u8", upstream.uri())))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains(&format!("https://{addr}/stream?url=")));
}

// ---------------------------------------------------------------------------
// Binary relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn binary_body_is_byte_identical() {
    let payload = binary_payload(200 * 1024);
    let upstream = MockServer::start().await;
    Mock::given(path("/seg.ts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(payload.clone(), "video/mp2t"),
        )
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/seg.ts", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp2t");
    assert_eq!(resp.headers()["accept-ranges"], "bytes");
    let body = resp.bytes().await.unwrap();
    assert_eq!(body.len(), payload.len());
    assert_eq!(&body[..], &payload[..]);
}

#[tokio::test]
async fn small_body_gets_exact_length() {
    let upstream = MockServer::start().await;
    Mock::given(path("/tiny.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3, 4, 5]))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/tiny.bin", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.headers()["content-length"], "5");
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    assert_eq!(&resp.bytes().await.unwrap()[..], &[1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn range_request_is_forwarded_and_206_echoed() {
    let payload = binary_payload(100);
    let upstream = MockServer::start().await;
    Mock::given(path("/film.mp4"))
        .and(header("range", "bytes=100-199"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 100-199/1000")
                .insert_header("accept-ranges", "bytes")
                .set_body_raw(payload.clone(), "video/mp4"),
        )
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::Client::new()
        .get(gateway(addr, "/stream", &format!("{}/film.mp4", upstream.uri())))
        .header("range", "bytes=100-199")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers()["content-range"], "bytes 100-199/1000");
    assert_eq!(resp.headers()["accept-ranges"], "bytes");
    assert_eq!(&resp.bytes().await.unwrap()[..], &payload[..]);
}

// ---------------------------------------------------------------------------
// Upstream failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_retried_once() {
    let upstream = MockServer::start().await;
    Mock::given(path("/flaky.ts"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(path("/flaky.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 188]))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let started = Instant::now();
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/flaky.ts", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(resp.bytes().await.unwrap().len(), 188);
    assert_eq!(upstream.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn persistent_server_error_is_surfaced() {
    let upstream = MockServer::start().await;
    Mock::given(path("/down.ts"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/down.ts", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.status(), 503);
    assert_eq!(upstream.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn configured_attempts_never_exceed_one_retry() {
    let upstream = MockServer::start().await;
    Mock::given(path("/down.ts"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&upstream)
        .await;

    let mut config = common::test_config();
    config.upstream.max_attempts = 5;
    let (_h, addr) = TestHarness::with_server_config(config, Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/down.ts", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    assert_eq!(upstream.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let upstream = MockServer::start().await;
    Mock::given(path("/missing.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{}/missing.ts", upstream.uri())))
        .await
        .unwrap();

    assert_eq!(resp.status(), 404);
    assert!(resp.headers().contains_key("x-request-id"));
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "upstream_rejected");
    assert!(json["error"].as_str().unwrap().contains("Failed to fetch stream"));
    assert!(json["request_id"].is_string());
    assert_eq!(upstream.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    // Port 9 (discard) is closed on test hosts.
    let resp = reqwest::get(gateway(addr, "/stream", "http://127.0.0.1:9/x.ts"))
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "upstream_unreachable");
}

#[tokio::test]
async fn origin_and_referer_follow_the_upstream() {
    let upstream = MockServer::start().await;
    let origin = upstream.uri();
    Mock::given(path("/seg.ts"))
        .and(header("origin", origin.as_str()))
        .and(header("referer", format!("{origin}/").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", &format!("{origin}/seg.ts")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_url_is_400() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;

    for path in ["/stream", "/image", "/stream?url="] {
        let resp = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        assert_eq!(resp.status(), 400, "{path}");
        let json: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(json["code"], "validation_error");
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("URL parameter is required"));
    }
}

#[tokio::test]
async fn non_http_url_is_400() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/stream", "file:///etc/passwd"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ---------------------------------------------------------------------------
// Image proxy, health, CORS
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_requests_carry_no_spoofed_origin() {
    let upstream = MockServer::start().await;
    Mock::given(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89u8], "image/png"))
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(gateway(addr, "/image", &format!("{}/logo.png", upstream.uri())))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("origin"));
    assert!(!requests[0].headers.contains_key("referer"));
    assert!(requests[0].headers.contains_key("user-agent"));
}

#[tokio::test]
async fn image_defaults_and_caching() {
    let upstream = MockServer::start().await;
    Mock::given(path("/logo"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;
    Mock::given(path("/logo.jpg"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0xffu8, 0xd8], "image/jpeg"),
        )
        .mount(&upstream)
        .await;

    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;

    let resp = reqwest::get(gateway(addr, "/image", &format!("{}/logo", upstream.uri())))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "image/png");
    assert_eq!(resp.headers()["cache-control"], "public, max-age=86400");
    assert!(resp.bytes().await.unwrap().is_empty());

    let resp = reqwest::get(gateway(addr, "/image", &format!("{}/logo.jpg", upstream.uri())))
        .await
        .unwrap();
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(&resp.bytes().await.unwrap()[..], &[0xff, 0xd8]);
}

#[tokio::test]
async fn health_check() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/stream"))
        .header("origin", "http://player.example")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (_h, addr) = TestHarness::with_server(Script::Emit(Vec::new())).await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/health"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");
}
