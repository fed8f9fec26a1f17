#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::Router;
use clarifia::{app, build_state, AppConfig, AppState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_APP_KEY: &str = "test-app-key";
pub const TEST_OPENAI_KEY: &str = "sk-test-upstream";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Configuration pointing at a mock upstream, with both secrets set.
pub fn test_config(upstream_base: &str) -> AppConfig {
    AppConfig {
        app_key: Some(TEST_APP_KEY.to_string()),
        openai_api_key: Some(TEST_OPENAI_KEY.to_string()),
        openai_base_url: upstream_base.to_string(),
        upstream_timeout_ms: 2_000,
        ..AppConfig::default()
    }
}

/// Serve the relay on an ephemeral port with peer addresses available to the
/// rate limiter. Returns the base URL.
pub async fn spawn_app(state: AppState) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{}", addr), handle)
}

pub async fn spawn_app_with_config(config: AppConfig) -> (String, JoinHandle<()>) {
    spawn_app(build_state(config).unwrap()).await
}

/// Stand up an in-process upstream. Returns a base URL usable as
/// `OPENAI_BASE_URL` (the router should serve `/v1/responses`).
pub async fn spawn_upstream(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/v1", addr), handle)
}
