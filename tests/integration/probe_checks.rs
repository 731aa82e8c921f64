//! Probes built from configuration, run against mock targets

use std::time::Duration;

use pretty_assertions::assert_eq;
use watchpost::{
    config::Config,
    probes::{ProbeStatus, build_probe},
    wire::SchedulerType,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolve(raw: serde_json::Value) -> watchpost::config::ResolvedConfig {
    serde_json::from_value::<Config>(raw)
        .unwrap()
        .resolve()
        .unwrap()
}

#[tokio::test]
async fn test_http_check_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ping"))
        .and(header("authorization", "Bearer t"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let url = format!("{}/ping", server.uri());
    let config = resolve(serde_json::json!({
        "checks": [{
            "id": "ping",
            "probe": {
                "type": "http", "url": url, "method": "POST",
                "headers": { "authorization": "Bearer t" }, "expected_status": 204
            }
        }]
    }));

    let probe = build_probe(&config.checks[0]).unwrap();
    let result = probe.execute().await;

    assert_eq!(result.status, ProbeStatus::Ok);
    assert_eq!(result.kind, SchedulerType::Http);
    assert_eq!(result.location, url);
    assert_eq!(result.port, server.address().port());
    assert!(result.description.is_empty());
}

#[tokio::test]
async fn test_http_check_wrong_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = resolve(serde_json::json!({
        "checks": [{ "id": "web", "probe": { "type": "http", "url": server.uri() } }]
    }));
    let result = build_probe(&config.checks[0]).unwrap().execute().await;

    assert_eq!(result.status, ProbeStatus::Error);
    assert_eq!(result.description, "WRONG_STATUS_CODE");
    assert_eq!(result.location, server.uri());
}

#[tokio::test]
async fn test_timeout_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = resolve(serde_json::json!({
        "checks": [{ "id": "slow", "timeout": 1, "probe": { "type": "http", "url": server.uri() } }]
    }));
    let result = build_probe(&config.checks[0]).unwrap().execute().await;

    assert_eq!(result.status, ProbeStatus::Error);
    assert!(result.elapsed < Duration::from_secs(3), "took {:?}", result.elapsed);
}

#[tokio::test]
async fn test_sitemap_check_from_config() {
    let server = MockServer::start().await;
    let body = format!(
        "<urlset><url><loc>{0}/a</loc></url><url><loc>{0}/b</loc></url></urlset>",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = resolve(serde_json::json!({
        "checks": [{
            "id": "site",
            "probe": { "type": "sitemap", "url": format!("{}/sitemap.xml", server.uri()), "concurrency": 2 }
        }]
    }));
    let result = build_probe(&config.checks[0]).unwrap().execute().await;

    assert_eq!(result.kind, SchedulerType::SiteMap);
    assert_eq!(result.status, ProbeStatus::Error);
    assert!(result.description.contains("/b"), "{}", result.description);
}

#[tokio::test]
async fn test_tcp_check_from_config() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = resolve(serde_json::json!({
        "checks": [{ "id": "db", "probe": { "type": "tcp", "host": "127.0.0.1", "port": port } }]
    }));
    let result = build_probe(&config.checks[0]).unwrap().execute().await;

    assert_eq!(result.status, ProbeStatus::Ok);
    assert_eq!(result.kind, SchedulerType::Tcp);
    assert_eq!(result.port, port);
}

#[test]
fn test_invalid_probe_config_is_rejected() {
    let config = resolve(serde_json::json!({
        "checks": [{ "id": "bad", "probe": { "type": "http", "url": "http://x", "method": "NOT A METHOD" } }]
    }));
    assert!(build_probe(&config.checks[0]).is_err());
}
