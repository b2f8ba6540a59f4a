//! End-to-end gateway flows that never need a live upstream: the public
//! endpoints, the auth gate, and CORS preflight.

use wicket_common::Config;
use wicket_core::Core;

fn base_config() -> Config {
    Config {
        auth_token: Some("integration-token".to_string()),
        ..Config::default()
    }
}

async fn spawn_gateway(config: Config) -> String {
    let core = Core::new(config).expect("build core");
    let app = core.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn landing_and_probe_are_public() {
    let base = spawn_gateway(base_config()).await;
    let client = wreq::Client::builder().build().unwrap();

    let resp = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("wicket"));

    let resp = client.get(format!("{base}/test")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let value: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(value["status"], "ok");

    let resp = client
        .get(format!("{base}/favicon.ico"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
}

#[tokio::test]
async fn unknown_prefix_without_token_is_401() {
    let base = spawn_gateway(base_config()).await;
    let client = wreq::Client::builder().build().unwrap();

    let resp = client
        .get(format!("{base}/not-a-route/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(resp.headers().get("x-proxy-error").unwrap(), "true");
    let value: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(value["error"]["code"], 401);
}

#[tokio::test]
async fn preset_auth_enabled_gates_presets() {
    let config = Config {
        preset_auth_enabled: true,
        ..base_config()
    };
    let base = spawn_gateway(config).await;
    let client = wreq::Client::builder().build().unwrap();

    let resp = client
        .get(format!("{base}/openai/v1/models"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let value: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(value["error"]["code"], 401);
}

#[tokio::test]
async fn token_only_path_is_400() {
    let base = spawn_gateway(base_config()).await;
    let client = wreq::Client::builder().build().unwrap();

    let resp = client
        .get(format!("{base}/integration-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let value: serde_json::Value = serde_json::from_str(&resp.text().await.unwrap()).unwrap();
    assert_eq!(value["error"]["code"], 400);
}

#[tokio::test]
async fn preflight_carries_cors() {
    let base = spawn_gateway(base_config()).await;
    let client = wreq::Client::builder().build().unwrap();

    let resp = client
        .request(wreq::Method::OPTIONS, format!("{base}/openai/v1/chat/completions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert!(resp.headers().contains_key("access-control-allow-methods"));
}
