use phisherman::config::PhishermanConfig;
use serde_json::Value;
use tokio::time::{Duration, sleep};

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral")
        .local_addr()
        .expect("local addr")
        .port()
}

fn loopback_config(port: u16) -> PhishermanConfig {
    let mut config = PhishermanConfig::default();
    config.gateway.bind = "127.0.0.1".to_string();
    config.gateway.port = port;
    config.audit.enabled = false;
    config
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    for _ in 0..80 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }

    panic!("gateway did not become healthy at {url}");
}

#[tokio::test]
async fn run_rejects_non_loopback_without_token() {
    let mut config = PhishermanConfig::default();
    config.gateway.bind = "0.0.0.0".to_string();
    config.gateway.port = free_port();
    config.audit.enabled = false;

    let err = phisherman::gateway::run(config, None)
        .await
        .expect_err("non-loopback run without token must fail");
    assert!(err.to_string().contains("Auth token required"));
}

#[tokio::test]
async fn invalid_cors_origin_is_a_startup_error() {
    let mut config = loopback_config(free_port());
    config.gateway.cors_origin = Some("bad\norigin".to_string());

    let err = phisherman::gateway::run(config, None)
        .await
        .expect_err("unparseable origin must fail");
    assert!(err.to_string().contains("invalid cors_origin"));
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let port = free_port();
    let config = loopback_config(port);
    let gateway = tokio::spawn(async move {
        let _ = phisherman::gateway::run(config, None).await;
    });

    wait_for_health(port).await;

    let url = format!("http://127.0.0.1:{port}/health");
    let response = reqwest::get(url).await.expect("health response");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.expect("health body");
    assert_eq!(body, "ok");

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn topics_endpoint_lists_lessons() {
    let port = free_port();
    let config = loopback_config(port);
    let gateway = tokio::spawn(async move {
        let _ = phisherman::gateway::run(config, None).await;
    });

    wait_for_health(port).await;

    let topics: Vec<Value> = reqwest::get(format!("http://127.0.0.1:{port}/topics"))
        .await
        .expect("topics response")
        .json()
        .await
        .expect("topics json");

    let ids: Vec<&str> = topics.iter().filter_map(|t| t["id"].as_str()).collect();
    assert_eq!(
        ids,
        vec!["suspicious_link", "abnormal_email", "random_email_address"]
    );
    for topic in &topics {
        assert_eq!(topic["questionCount"], 10);
        assert_eq!(topic["bullets"].as_array().map(Vec::len), Some(4));
        assert!(topic["title"].as_str().is_some_and(|t| !t.is_empty()));
    }

    gateway.abort();
    let _ = gateway.await;
}

#[tokio::test]
async fn cors_allows_configured_origin() {
    let port = free_port();
    let config = loopback_config(port);
    let gateway = tokio::spawn(async move {
        let _ = phisherman::gateway::run(config, None).await;
    });

    wait_for_health(port).await;

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/topics"))
        .header(reqwest::header::ORIGIN, "http://localhost:3000")
        .send()
        .await
        .expect("topics response");
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );

    gateway.abort();
    let _ = gateway.await;
}
