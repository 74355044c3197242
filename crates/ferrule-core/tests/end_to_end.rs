//! Engine and client talking over real sockets

use ferrule_core::{
    get, group, post, standard_routes, ActivityEvent, AllowedOrigin, BearerAuth, ClientConfig,
    Cors, CorsConfig, Engine, Headers, HttpClient, KeyedRateLimit, Method, RequestAuth, Response,
    RouteList, Router, ServerConfig,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn routes() -> Router {
    let mut routes = vec![
        get("/", |_, _| async { Response::text("ferrule") }),
        standard_routes::list_routes(),
    ];
    routes.extend(group(
        "/test",
        vec![post("echo", |req, _| async move {
            Response::text(format!("echo: {}", req.body_text()))
        })],
    ));
    routes.extend(
        group(
            "/api",
            vec![get("items", |_, _| async { Response::json(&["a", "b"]) })],
        )
        .allow([Method::Options, Method::Head])
        .with_middleware(Cors::new(CorsConfig::new(AllowedOrigin::Only(
            "http://a.com".to_string(),
        ))))
        .with_middleware(KeyedRateLimit::new(2, Duration::from_secs(60))),
    );
    routes.push(
        get("/admin/users", |_, _| async { Response::text("alice") })
            .with_middleware(BearerAuth::new("s3cret")),
    );
    Router::new(routes)
}

async fn start(events: Arc<Mutex<Vec<ActivityEvent>>>) -> (Engine, HttpClient) {
    let engine = Engine::new(ServerConfig::new().name("e2e").port(0), routes())
        .unwrap()
        .activity_sink(move |e: &ActivityEvent| events.lock().push(e.clone()));
    let addr = engine.start().await.unwrap();
    let client = HttpClient::new(
        ClientConfig::new("127.0.0.1", addr.port()).timeout(Duration::from_secs(2)),
    )
    .unwrap();
    (engine, client)
}

async fn raw(addr: SocketAddr, wire: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(wire).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (engine, client) = start(Arc::default()).await;

    let res = client.post("/test/echo", "hello", RequestAuth::None).await.unwrap();
    assert_eq!(res.status.code, 200);
    assert_eq!(res.body_string().as_deref(), Some("echo: hello"));
    assert_eq!(res.content_type(), Some("text/plain; charset=utf-8"));

    engine.stop();
}

#[tokio::test]
async fn test_unknown_route_and_wrong_method() {
    let (engine, client) = start(Arc::default()).await;

    let res = client.get("/missing", RequestAuth::None).await.unwrap();
    assert_eq!(res.status.code, 404);
    assert_eq!(res.body_string().as_deref(), Some("No route for GET /missing"));

    let res = client.delete("/test/echo", RequestAuth::None).await.unwrap();
    assert_eq!(res.status.code, 405);
    assert_eq!(
        res.body_string().as_deref(),
        Some("Method DELETE not allowed for /test/echo")
    );

    engine.stop();
}

#[tokio::test]
async fn test_cors_preflight_and_head() {
    let (engine, client) = start(Arc::default()).await;

    let headers: Headers = [
        ("Origin".to_string(), "http://a.com".to_string()),
        ("Access-Control-Request-Method".to_string(), "GET".to_string()),
    ]
    .into_iter()
    .collect();
    let res = client
        .send(Method::Options, "/api/items", headers, Default::default(), RequestAuth::None)
        .await
        .unwrap();
    assert_eq!(res.status.code, 204);
    assert_eq!(res.header("Access-Control-Allow-Origin"), Some("http://a.com"));

    let res = client
        .send(Method::Head, "/api/items", Headers::new(), Default::default(), RequestAuth::None)
        .await
        .unwrap();
    assert_eq!(res.status.code, 200);
    assert!(res.body.is_empty());

    engine.stop();
}

#[tokio::test]
async fn test_rate_limit_over_the_wire() {
    let (engine, client) = start(Arc::default()).await;
    let as_user = |user: &str| RequestAuth::Custom("X-User-ID".to_string(), user.to_string());

    assert_eq!(client.get("/api/items", as_user("u1")).await.unwrap().status.code, 200);
    assert_eq!(client.get("/api/items", as_user("u1")).await.unwrap().status.code, 200);
    let res = client.get("/api/items", as_user("u1")).await.unwrap();
    assert_eq!(res.status.code, 429);
    assert_eq!(res.header("X-RateLimit-Limit"), Some("2"));
    assert!(res.header("Retry-After").is_some());

    assert_eq!(client.get("/api/items", as_user("u2")).await.unwrap().status.code, 200);
    engine.stop();
}

#[tokio::test]
async fn test_bearer_protected_route() {
    let (engine, client) = start(Arc::default()).await;

    let res = client.get("/admin/users", RequestAuth::None).await.unwrap();
    assert_eq!(res.status.code, 401);
    assert!(res.header("WWW-Authenticate").is_some());

    let res = client
        .get("/admin/users", RequestAuth::Bearer("wrong".to_string()))
        .await
        .unwrap();
    assert_eq!(res.status.code, 401);
    assert_eq!(res.body_string().as_deref(), Some("Invalid API token"));

    let res = client
        .get("/admin/users", RequestAuth::Bearer("s3cret".to_string()))
        .await
        .unwrap();
    assert_eq!(res.status.code, 200);
    assert_eq!(res.body_string().as_deref(), Some("alice"));

    engine.stop();
}

#[tokio::test]
async fn test_route_listing() {
    let (engine, client) = start(Arc::default()).await;

    let res = client.get("/routes", RequestAuth::None).await.unwrap();
    assert_eq!(res.status.code, 200);
    let listing: serde_json::Value = serde_json::from_slice(&res.body).unwrap();
    assert_eq!(listing["count"], 5);
    assert_eq!(listing["routes"][2]["path"], "/test/echo");
    assert_eq!(listing["routes"][2]["method"], "POST");

    engine.stop();
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let (engine, _) = start(Arc::default()).await;
    let addr = engine.local_addr().unwrap();

    let out = raw(addr, b"/nomethod\r\n\r\n").await;
    assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    engine.stop();
}

#[tokio::test]
async fn test_activity_events_are_recorded() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (engine, client) = start(events.clone()).await;

    let mut headers = Headers::new();
    headers.set("X-Request-ID", "req-42");
    client
        .send(Method::Get, "/", headers, Default::default(), RequestAuth::None)
        .await
        .unwrap();
    // Recorded after the response is flushed; give the connection task a moment
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].service_name, "e2e");
    assert_eq!(events[0].status.code, 200);
    assert_eq!(events[0].request_id.as_deref(), Some("req-42"));
    assert_eq!(events[0].client_address.as_deref(), Some("127.0.0.1"));
    assert!(events[0].duration.is_some());
    drop(events);

    engine.stop();
}
