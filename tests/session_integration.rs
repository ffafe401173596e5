//! Integration tests for request execution against mock HTTP servers.
//!
//! These tests cover redirect capture, cookie mirroring, form encoding and
//! multipart uploads with local and remote file references.

use lazyfetch_core::{Fields, HeaderVar, Method, Session, Setting};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Mounts `/start` -> 302 -> `/end` with a cookie on the first hop.
async fn setup_redirect_chain() -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "/end")
                .insert_header("Set-Cookie", "sid=abc123; Path=/")
                .insert_header("X-Backend", "node 10.0.0.20:8080"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/end"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Stage", "final")
                .insert_header("Content-Type", "text/plain")
                .set_body_string("arrived"),
        )
        .mount(&mock_server)
        .await;

    mock_server
}

fn multipart_body(request: &Request) -> String {
    String::from_utf8_lossy(&request.body).to_lowercase()
}

#[tokio::test]
async fn test_exec_captures_one_hop_per_response() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    assert_eq!(session.status(), 200);
    assert_eq!(session.text(), "arrived");
    assert_eq!(session.content_type(), Some("text/plain"));
    assert_eq!(session.effective_url().unwrap().path(), "/end");

    let hops = session.hops();
    assert_eq!(hops.len(), 2, "hops: {hops:?}");
    assert!(hops[0].status_line().unwrap().contains("302"));
    assert!(hops[1].status_line().unwrap().contains("200"));
    assert_eq!(hops[0].var("location"), Some("/end"));
    assert_eq!(hops[1].var("x-stage"), Some("final"));
    assert!(hops[0].var("set-cookie").is_none());
    assert_eq!(
        hops[0].vars.get("x-backend:ip"),
        Some(&HeaderVar::Addresses(vec!["10.0.0.20".parse().unwrap()]))
    );
    assert!(hops[1].var("x-backend").is_none());

    let log = session.log();
    assert_eq!(log.response.len(), 2);
    assert_eq!(log.info.as_ref().unwrap().redirect_count, 1);
    assert!(log.request[0].starts_with("GET /end"));
    assert!(log.summary.as_deref().unwrap().starts_with("[utc:"));
}

#[tokio::test]
async fn test_exec_mirrors_cookies_into_store_and_hop() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    assert_eq!(
        session.hops()[0].cookies.get("sid").map(String::as_str),
        Some("abc123")
    );
    assert!(session.hops()[1].cookies.is_empty());
    assert_eq!(
        session.log().set_cookie[0].get("sid").map(String::as_str),
        Some("abc123")
    );

    let cookies = session.cookies();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].name, "sid");
    assert_eq!(cookies[0].value(), "abc123");
    assert_eq!(cookies[0].domain, "127.0.0.1");
    assert!(cookies[0].host_only);
    assert!(cookies[0].session_only);
}

#[tokio::test]
async fn test_exec_does_not_replay_cookies_by_default() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    let requests = mock_server.received_requests().await.unwrap();
    let end = requests.iter().find(|r| r.url.path() == "/end").unwrap();
    assert!(end.headers.get("cookie").is_none());
}

#[tokio::test]
async fn test_exec_replays_cookies_when_enabled() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");
    session.set_send_cookies(true).unwrap();
    assert!(session.send_cookies());

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    let requests = mock_server.received_requests().await.unwrap();
    let end = requests.iter().find(|r| r.url.path() == "/end").unwrap();
    let cookie = end.headers.get("cookie").unwrap().to_str().unwrap();
    assert!(cookie.contains("sid=abc123"), "cookie: {cookie}");
}

#[tokio::test]
async fn test_exec_sends_auto_referer_on_redirect() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    let requests = mock_server.received_requests().await.unwrap();
    let end = requests.iter().find(|r| r.url.path() == "/end").unwrap();
    assert_eq!(end.headers.get("referer").unwrap().to_str().unwrap(), url);
}

#[tokio::test]
async fn test_exec_referer_applies_to_one_call_only() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut session = Session::new().expect("session builds");
    let warnings = session.set_opt([Setting::Referer(Some("http://origin.test/".to_string()))]);
    assert!(warnings.is_empty());

    let url = format!("{}/page", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].headers.get("referer").unwrap().to_str().unwrap(),
        "http://origin.test/"
    );
    assert!(requests[1].headers.get("referer").is_none());
    assert!(session.config().referer.is_none());
}

#[tokio::test]
async fn test_exec_fails_when_redirect_limit_exceeded() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&mock_server)
        .await;

    let mut session = Session::new().expect("session builds");
    session.set_opt([Setting::MaxRedirects(2)]);

    let url = format!("{}/loop", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    assert_eq!(session.status(), 0);
    assert!(session.text().contains("maximum (2) redirects"), "{}", session.text());
    assert_eq!(session.hops().len(), 3);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_exec_without_follow_location_stops_at_redirect() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");
    session.set_opt([Setting::FollowLocation(false)]);

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    assert_eq!(session.status(), 302);
    assert_eq!(session.hops().len(), 1);
}

#[tokio::test]
async fn test_exec_nobody_sends_head() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/probe"))
        .respond_with(ResponseTemplate::new(204).insert_header("X-Seen", "yes"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut session = Session::new().expect("session builds");
    session.set_opt([Setting::NoBody(true)]);
    let url = format!("{}/probe", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;

    assert_eq!(session.status(), 204);
    assert_eq!(session.hops()[0].var("x-seen"), Some("yes"));
    assert!(session.data().is_empty());
}

#[tokio::test]
async fn test_exec_post_sends_urlencoded_flattened_fields() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("Name=Blue%20Shirt&Size%5BWidth%5D=50px&Size%5BHeight%5D=60px"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fields = Fields::from_json(&json!({
        "Name": "Blue Shirt",
        "Size": {"Width": "50px", "Height": "60px"},
        "Missing": null
    }))
    .unwrap();

    let mut session = Session::new().expect("session builds");
    let url = format!("{}/form", mock_server.uri());
    session.exec(&url, Method::POST, &fields, &[]).await;

    assert_eq!(session.status(), 200);
    assert_eq!(session.text(), "ok");
}

#[tokio::test]
async fn test_exec_get_ignores_fields() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let fields = Fields::new().with("a", "1");
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/plain", mock_server.uri());
    session.exec(&url, Method::GET, &fields, &[]).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].body.is_empty());
}

#[tokio::test]
async fn test_exec_post_multipart_with_local_file() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&mock_server)
        .await;

    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let file = temp_dir.path().join("note.txt");
    std::fs::write(&file, "hello multipart").unwrap();
    let marker = format!("@{}", file.display());

    let fields = Fields::new()
        .with("title", "Report")
        .with("doc", marker.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/upload", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&marker))
        .await;

    assert_eq!(session.status(), 201);
    let requests = mock_server.received_requests().await.unwrap();
    let content_type = requests[0].headers.get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("multipart/form-data"));

    let body = multipart_body(&requests[0]);
    assert!(body.contains(r#"name="title""#));
    assert!(body.contains("report"));
    assert!(body.contains(r#"name="doc"; filename="note.txt""#), "{body}");
    assert!(body.contains("content-type: text/plain"));
    assert!(body.contains("hello multipart"));
}

#[tokio::test]
async fn test_exec_missing_local_file_degrades_to_empty_value() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let marker = "@/definitely/not/here.bin".to_string();
    let fields = Fields::new().with("doc", marker.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/upload", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&marker))
        .await;

    assert_eq!(session.status(), 200);
    assert_eq!(session.log().warnings.len(), 1);
    let body = multipart_body(&mock_server.received_requests().await.unwrap()[0]);
    assert!(body.contains(r#"name="doc""#));
    assert!(!body.contains("filename="));
}

#[tokio::test]
async fn test_exec_prefetches_remote_file_reference() {
    let mock_server = MockServer::start().await;
    let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    Mock::given(method("GET"))
        .and(path("/img.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/jpeg")
                .set_body_bytes(jpeg.to_vec()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let image_ref = format!("@{}/img.jpg", mock_server.uri());
    let fields = Fields::from_json(&json!({
        "Size": {"Width": "50px", "Height": "50px"},
        "Image": image_ref
    }))
    .unwrap();

    let mut session = Session::new().expect("session builds");
    let url = format!("{}/products", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&image_ref))
        .await;

    assert_eq!(session.status(), 200);
    assert_eq!(session.text(), "stored");
    assert!(session.log().warnings.is_empty(), "{:?}", session.log().warnings);

    let requests = mock_server.received_requests().await.unwrap();
    let prefetch = requests.iter().find(|r| r.url.path() == "/img.jpg").unwrap();
    let agent = prefetch.headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(agent.contains("(prefetch)"), "agent: {agent}");

    let post = requests.iter().find(|r| r.url.path() == "/products").unwrap();
    let body = multipart_body(post);
    assert!(body.contains(r#"name="size[width]""#));
    assert!(body.contains(r#"name="size[height]""#));
    assert!(body.contains(r#"name="image"; filename="img.jpg""#), "{body}");
    assert!(body.contains("content-type: image/jpeg"));
    assert!(post.body.windows(4).any(|w| w == b"JFIF"));
}

#[tokio::test]
async fn test_exec_failed_prefetch_degrades_to_warning() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let image_ref = format!("@{}/gone.png", mock_server.uri());
    let fields = Fields::new().with("Image", image_ref.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/products", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&image_ref))
        .await;

    assert_eq!(session.status(), 200);
    let warnings = &session.log().warnings;
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("404"), "{warnings:?}");
}

#[tokio::test]
async fn test_exec_empty_remote_body_degrades_to_warning() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.jpg"))
        .respond_with(ResponseTemplate::new(200).insert_header("Content-Type", "image/jpeg"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let image_ref = format!("@{}/empty.jpg", mock_server.uri());
    let fields = Fields::new()
        .with("Title", "blank")
        .with("Image", image_ref.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/products", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&image_ref))
        .await;

    assert_eq!(session.status(), 200);
    let warnings = &session.log().warnings;
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("empty body"), "{warnings:?}");

    let requests = mock_server.received_requests().await.unwrap();
    let post = requests.iter().find(|r| r.url.path() == "/products").unwrap();
    let body = multipart_body(post);
    assert!(!body.contains("filename="), "{body}");
    assert!(!body.contains("empty.jpg"), "{body}");
}

#[tokio::test]
async fn test_exec_remote_name_takes_extension_from_type_override() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pic"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(b"\x89PNG\r\n\x1a\n0000".to_vec()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let image_ref = format!("@{}/pic\ttype=image/png", mock_server.uri());
    let fields = Fields::new().with("Image", image_ref.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/products", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&image_ref))
        .await;

    assert!(session.log().warnings.is_empty(), "{:?}", session.log().warnings);
    let requests = mock_server.received_requests().await.unwrap();
    let post = requests.iter().find(|r| r.url.path() == "/products").unwrap();
    let body = multipart_body(post);
    assert!(body.contains(r#"filename="pic.image.png""#), "{body}");
    assert!(body.contains("content-type: image/png"), "{body}");
}

#[tokio::test]
async fn test_exec_remote_root_url_name_gets_content_type_extension() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/plain")
                .set_body_string("plain words"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let note_ref = format!("@{}/", mock_server.uri());
    let fields = Fields::new().with("Note", note_ref.as_str());
    let mut session = Session::new().expect("session builds");
    let url = format!("{}/notes", mock_server.uri());
    session
        .exec(&url, Method::POST, &fields, std::slice::from_ref(&note_ref))
        .await;

    assert!(session.log().warnings.is_empty(), "{:?}", session.log().warnings);
    let requests = mock_server.received_requests().await.unwrap();
    let post = requests.iter().find(|r| r.url.path() == "/notes").unwrap();
    let body = multipart_body(post);
    assert!(body.contains(r#"filename="lf_"#), "{body}");
    assert!(body.contains(r#".text.plain""#), "{body}");
}

#[tokio::test]
async fn test_exec_invalid_url_reports_in_body() {
    let mut session = Session::new().expect("session builds");
    session
        .exec("not a url", Method::GET, &Fields::new(), &[])
        .await;

    assert_eq!(session.status(), 0);
    assert!(session.text().contains("invalid URL"));
    assert!(session.hops().is_empty());
}

#[tokio::test]
async fn test_exec_resets_state_between_calls() {
    let mock_server = setup_redirect_chain().await;
    let mut session = Session::new().expect("session builds");

    let url = format!("{}/start", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;
    assert_eq!(session.hops().len(), 2);

    let url = format!("{}/end", mock_server.uri());
    session.exec(&url, Method::GET, &Fields::new(), &[]).await;
    assert_eq!(session.hops().len(), 1);
    assert_eq!(session.log().response.len(), 1);
    assert_eq!(session.cookies().len(), 1, "store persists across calls");
}

#[tokio::test]
async fn test_exec_json_rejects_non_object() {
    let mut session = Session::new().expect("session builds");
    let result = session
        .exec_json("http://127.0.0.1:9/", Method::POST, &json!([1, 2]), &[])
        .await;
    assert!(result.is_err());
}
