//! RegistryClient: thin capability adapter over the external discovery
//! registry (§2, out of scope at §1 beyond this interface).
//!
//! `router-core` only depends on this trait, never on a concrete
//! transport, so it can be exercised in tests with `InMemoryRegistryClient`
//! per §10.4 — no live registry needed. `HttpRegistryClient` is the real
//! adapter, built on `reqwest` the way the teacher's `client/mod.rs`
//! wraps its own transport behind a typed interface.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{GatewayError, Result};
use crate::message::FramedMessage;

/// One service's route list as returned by the registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteDef {
    pub service: String,
    pub patterns: Vec<String>,
}

/// A live instance of a service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Instance {
    pub id: String,
    pub addr: Option<String>,
}

/// What the gateway publishes about itself on startup (§4.9).
#[derive(Debug, Clone, Serialize)]
pub struct SelfRegistration {
    pub service: String,
    pub instance: String,
    pub routes: Vec<String>,
}

/// Result of `make_api_request`: either the registry's raw pass-through
/// of the upstream HTTP response, or its normalized JSON form when no
/// upstream transport headers are available.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// `None` means the registry returned its normalized form rather
    /// than raw upstream transport headers.
    pub headers: Option<HashMap<String, String>>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn is_normalized(&self) -> bool {
        self.headers.is_none()
    }

    pub fn is_json(&self) -> bool {
        self.content_type.as_deref().map(|ct| ct.contains("application/json")).unwrap_or(false)
    }
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch routes for one service, or all services when `service` is `None`.
    async fn fetch_routes(&self, service: Option<&str>) -> Result<Vec<RouteDef>>;

    /// Live instances currently registered for `service`.
    async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>>;

    /// The registry's own health snapshot, passed through verbatim.
    async fn fetch_health(&self) -> Result<serde_json::Value>;

    /// Forward an envelope to the addressed service/instance and await
    /// its response, bounded by `timeout`.
    async fn make_api_request(&self, envelope: &FramedMessage, timeout: Duration) -> Result<UpstreamResponse>;

    /// Fire-and-forget directed send to a specific instance or service.
    async fn send_message(&self, msg: &FramedMessage) -> Result<()>;

    /// Publish to the cluster-wide broadcast channel (gossip, refresh).
    async fn publish_broadcast(&self, msg: &FramedMessage) -> Result<()>;

    /// Subscribe to the broadcast channel; messages arrive on the
    /// returned receiver until it is dropped.
    async fn subscribe_broadcast(&self) -> Result<mpsc::Receiver<FramedMessage>>;

    /// Register this gateway instance's own presence and routes.
    async fn register_self(&self, registration: SelfRegistration) -> Result<()>;

    /// Registry-side housekeeping: drop presence entries whose
    /// `elapsed > 5s` (§4.8 `/v1/router/clear`).
    async fn clear_stale_presence(&self) -> Result<()>;

    /// RPUSH-equivalent enqueue onto a named queue list.
    async fn queue_push(&self, key: &str, msg: &FramedMessage, ttl: Duration) -> Result<()>;

    /// RPOPLPUSH-equivalent atomic move from `from_key` to `to_key`.
    async fn queue_move(&self, from_key: &str, to_key: &str, ttl: Duration) -> Result<Option<FramedMessage>>;

    /// Remove exactly one matching entry from `key`.
    async fn queue_remove(&self, key: &str, mid: &str) -> Result<()>;
}

/// Real registry adapter over HTTP, via `reqwest`.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpRegistryClient { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn fetch_routes(&self, service: Option<&str>) -> Result<Vec<RouteDef>> {
        let url = match service {
            Some(s) => self.url(&format!("/routes/{}", s)),
            None => self.url("/routes"),
        };
        let resp = self.client.get(url).send().await?;
        Ok(resp.json::<Vec<RouteDef>>().await?)
    }

    async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>> {
        let resp = self.client.get(self.url(&format!("/instances/{}", service))).send().await?;
        Ok(resp.json::<Vec<Instance>>().await?)
    }

    async fn fetch_health(&self) -> Result<serde_json::Value> {
        let resp = self.client.get(self.url("/health")).send().await?;
        Ok(resp.json().await?)
    }

    async fn make_api_request(&self, envelope: &FramedMessage, timeout: Duration) -> Result<UpstreamResponse> {
        let resp = self
            .client
            .post(self.url("/api-request"))
            .timeout(timeout)
            .json(&envelope.to_long_json())
            .send()
            .await
            .map_err(|e| if e.is_timeout() { GatewayError::UpstreamTimeout } else { GatewayError::Transport(e) })?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let headers = resp.headers().get("x-upstream-headers").map(|_| {
            resp.headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
                .collect::<HashMap<String, String>>()
        });
        let body = resp.bytes().await?.to_vec();

        Ok(UpstreamResponse { status, headers, content_type, body })
    }

    async fn send_message(&self, msg: &FramedMessage) -> Result<()> {
        self.client.post(self.url("/messages")).json(&msg.to_long_json()).send().await?;
        Ok(())
    }

    async fn publish_broadcast(&self, msg: &FramedMessage) -> Result<()> {
        self.client.post(self.url("/broadcast")).json(&msg.to_long_json()).send().await?;
        Ok(())
    }

    async fn subscribe_broadcast(&self) -> Result<mpsc::Receiver<FramedMessage>> {
        let (tx, rx) = mpsc::channel(256);
        let mut resp = self.client.get(self.url("/broadcast/subscribe")).send().await?;
        tokio::spawn(async move {
            let mut buf = String::new();
            loop {
                let chunk = match resp.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(_) => break,
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find("\n\n") {
                    let event: String = buf.drain(..pos + 2).collect();
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data:") else { continue };
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(data.trim()) else { continue };
                        let Ok(frame) = FramedMessage::from_value(value) else { continue };
                        if tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn register_self(&self, registration: SelfRegistration) -> Result<()> {
        self.client.post(self.url("/register")).json(&registration).send().await?;
        Ok(())
    }

    async fn clear_stale_presence(&self) -> Result<()> {
        self.client.post(self.url("/presence/clear")).send().await?;
        Ok(())
    }

    async fn queue_push(&self, key: &str, msg: &FramedMessage, ttl: Duration) -> Result<()> {
        self.client
            .post(self.url(&format!("/queue/{}/push", key)))
            .json(&serde_json::json!({"message": msg.to_long_json(), "ttlSecs": ttl.as_secs()}))
            .send()
            .await?;
        Ok(())
    }

    async fn queue_move(&self, from_key: &str, to_key: &str, _ttl: Duration) -> Result<Option<FramedMessage>> {
        let resp = self
            .client
            .post(self.url(&format!("/queue/{}/moveto/{}", from_key, to_key)))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let value: serde_json::Value = resp.json().await?;
        Ok(Some(FramedMessage::from_value(value)?))
    }

    async fn queue_remove(&self, key: &str, mid: &str) -> Result<()> {
        self.client.post(self.url(&format!("/queue/{}/remove/{}", key, mid))).send().await?;
        Ok(())
    }
}

/// In-memory fake used from unit tests (§10.4): no network involved.
#[derive(Default)]
pub struct InMemoryRegistryClient {
    pub routes: Mutex<HashMap<String, Vec<String>>>,
    pub instances: Mutex<HashMap<String, Vec<Instance>>>,
    pub sent: Mutex<Vec<FramedMessage>>,
    pub broadcasts: Mutex<Vec<FramedMessage>>,
    pub queues: Mutex<HashMap<String, Vec<FramedMessage>>>,
    pub next_response: Mutex<Option<UpstreamResponse>>,
}

impl InMemoryRegistryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(self, service: &str, patterns: Vec<String>) -> Self {
        self.routes.lock().unwrap().insert(service.to_string(), patterns);
        self
    }

    pub fn with_instance(self, service: &str, instance: Instance) -> Self {
        self.instances.lock().unwrap().entry(service.to_string()).or_default().push(instance);
        self
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistryClient {
    async fn fetch_routes(&self, service: Option<&str>) -> Result<Vec<RouteDef>> {
        let routes = self.routes.lock().unwrap();
        Ok(match service {
            Some(s) => routes
                .get(s)
                .map(|p| vec![RouteDef { service: s.to_string(), patterns: p.clone() }])
                .unwrap_or_default(),
            None => routes.iter().map(|(s, p)| RouteDef { service: s.clone(), patterns: p.clone() }).collect(),
        })
    }

    async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>> {
        Ok(self.instances.lock().unwrap().get(service).cloned().unwrap_or_default())
    }

    async fn fetch_health(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"status": "ok"}))
    }

    async fn make_api_request(&self, _envelope: &FramedMessage, _timeout: Duration) -> Result<UpstreamResponse> {
        Ok(self.next_response.lock().unwrap().clone().unwrap_or(UpstreamResponse {
            status: 200,
            headers: None,
            content_type: Some("application/json".to_string()),
            body: b"{}".to_vec(),
        }))
    }

    async fn send_message(&self, msg: &FramedMessage) -> Result<()> {
        self.sent.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn publish_broadcast(&self, msg: &FramedMessage) -> Result<()> {
        self.broadcasts.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn subscribe_broadcast(&self) -> Result<mpsc::Receiver<FramedMessage>> {
        let (_tx, rx) = mpsc::channel(16);
        Ok(rx)
    }

    async fn register_self(&self, _registration: SelfRegistration) -> Result<()> {
        Ok(())
    }

    async fn clear_stale_presence(&self) -> Result<()> {
        Ok(())
    }

    async fn queue_push(&self, key: &str, msg: &FramedMessage, _ttl: Duration) -> Result<()> {
        self.queues.lock().unwrap().entry(key.to_string()).or_default().push(msg.clone());
        Ok(())
    }

    async fn queue_move(&self, from_key: &str, to_key: &str, _ttl: Duration) -> Result<Option<FramedMessage>> {
        let mut queues = self.queues.lock().unwrap();
        let Some(list) = queues.get_mut(from_key) else { return Ok(None) };
        if list.is_empty() {
            return Ok(None);
        }
        let msg = list.remove(0);
        queues.entry(to_key.to_string()).or_default().push(msg.clone());
        Ok(Some(msg))
    }

    async fn queue_remove(&self, key: &str, mid: &str) -> Result<()> {
        if let Some(list) = self.queues.lock().unwrap().get_mut(key) {
            if let Some(pos) = list.iter().position(|m| m.mid == mid) {
                list.remove(pos);
            }
        }
        Ok(())
    }
}

impl Clone for UpstreamResponse {
    fn clone(&self) -> Self {
        UpstreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            content_type: self.content_type.clone(),
            body: self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_fetch_routes_filters_by_service() {
        let registry = InMemoryRegistryClient::new()
            .with_route("orders", vec!["/v1/orders/:id".to_string()])
            .with_route("billing", vec!["/v1/bill/:id".to_string()]);

        let all = registry.fetch_routes(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = registry.fetch_routes(Some("orders")).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].service, "orders");
    }

    #[tokio::test]
    async fn in_memory_queue_push_move_remove_round_trips() {
        let registry = InMemoryRegistryClient::new();
        let msg = FramedMessage::new("orders", "gw@router:/", json!({}), "tr1");
        registry.queue_push("q:queued", &msg, Duration::from_secs(60)).await.unwrap();

        let moved = registry.queue_move("q:queued", "q:processing", Duration::from_secs(60)).await.unwrap();
        assert_eq!(moved.unwrap().mid, msg.mid);

        registry.queue_remove("q:processing", &msg.mid).await.unwrap();
        let empty = registry.queue_move("q:processing", "q:other", Duration::from_secs(60)).await.unwrap();
        assert!(empty.is_none());
    }
}
