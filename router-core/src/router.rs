//! MessageRouter: dispatch engine for framed messages arriving over
//! persistent connections (source A) and the registry broadcast channel
//! (source B), per §4.4.
//!
//! Implemented as methods on `Gateway` rather than a separate struct:
//! the dispatch logic needs every piece of shared state the gateway
//! already owns (routes, directory, stats, offline queue, admin
//! surface), and the source system's single global router maps onto
//! "one Gateway instance constructed at start" per §9.

use std::time::Duration;

use serde_json::json;

use crate::config;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::message::{parse_route, FramedMessage};

/// What the caller (the websocket handler in `router-api`) should do
/// after `handle_client_frame` returns.
pub enum ClientDispatchOutcome {
    /// Send this frame back over the same connection.
    Reply(FramedMessage),
    /// The client's id changed (reconnect); `drained` messages were
    /// delivered from the offline queue as a side effect.
    Reconnected { new_client_id: String, drained: usize },
    /// Already fully handled (directed send, enqueue, local forward); no
    /// reply is owed on this connection.
    Handled,
    /// Emit this error frame, then close the connection.
    Disconnect(FramedMessage),
}

fn error_frame(message: &str) -> FramedMessage {
    let mut frame = FramedMessage::new("", "", json!({"error": message}), "err");
    frame.msg_type = Some("error".to_string());
    frame
}

impl Gateway {
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(config::Router::RequestTimeout.xget::<u64>())
    }

    /// Entry point for source (A): a frame read off a persistent client
    /// connection currently bound to `client_id`.
    pub async fn handle_client_frame(&self, client_id: &str, raw: &str) -> ClientDispatchOutcome {
        let frame = match FramedMessage::parse(raw) {
            Ok(f) => f,
            Err(e) => return ClientDispatchOutcome::Disconnect(error_frame(&format!("malformed frame: {e}"))),
        };

        if self.security.force_message_signature && !frame.verify(&self.security.signature_shared_secret) {
            return ClientDispatchOutcome::Disconnect(error_frame("signature verification failed"));
        }

        let to_addr = match parse_route(&frame.to) {
            Ok(a) => a,
            Err(e) => return ClientDispatchOutcome::Disconnect(error_frame(&format!("malformed to: {e}"))),
        };

        self.ws_stats.log(&to_addr.service);

        // Step 3: method-tagged `to` dispatches to an HTTP-shaped handler.
        if to_addr.method.is_some() {
            if self.is_self(&to_addr.service) {
                return match self.dispatch_self_admin(&frame).await {
                    Some(reply) => ClientDispatchOutcome::Reply(reply),
                    None => ClientDispatchOutcome::Handled,
                };
            }
            let reply = self.forward_envelope_reply(&frame, &to_addr.service).await;
            return ClientDispatchOutcome::Reply(reply);
        }

        // Step 4: self-addressed message types.
        if self.is_self(&to_addr.service) {
            return self.dispatch_self_message_type(client_id, &frame).await;
        }

        // Step 5: forwarded to another connected client.
        if frame.forward.is_some() {
            if let Err(e) = self.dispatch_forward(&frame).await {
                tracing::error!(error = %e, client_id, "forward dispatch failed");
                self.issue_log.error(format!("forward dispatch failed: {e}"));
            }
            return ClientDispatchOutcome::Handled;
        }

        // Step 6: dispatch to a service instance.
        match self.dispatch_to_service(client_id, &to_addr, &frame).await {
            Ok(Some(reply)) => ClientDispatchOutcome::Reply(reply),
            Ok(None) => ClientDispatchOutcome::Handled,
            Err(e) => {
                tracing::error!(error = %e, client_id, service = %to_addr.service, "service dispatch failed");
                self.issue_log.error(format!("service dispatch failed: {e}"));
                ClientDispatchOutcome::Handled
            }
        }
    }

    async fn dispatch_self_admin(&self, frame: &FramedMessage) -> Option<FramedMessage> {
        let admin = self.admin_surface()?;
        admin.handle_self_message(self, frame).await
    }

    async fn forward_envelope_reply(&self, frame: &FramedMessage, service: &str) -> FramedMessage {
        self.http_stats.log(service);
        match self.registry.make_api_request(frame, self.request_timeout()).await {
            Ok(resp) => {
                if resp.status > 201 {
                    self.error_stats.log(service);
                }
                let body = serde_json::from_slice::<serde_json::Value>(&resp.body)
                    .unwrap_or_else(|_| json!({"raw": String::from_utf8_lossy(&resp.body)}));
                frame.reply(self.identity.self_address(), json!({"status": resp.status, "body": body}), "rep")
            }
            Err(e) => {
                self.error_stats.log(service);
                tracing::error!(error = %e, service, "envelope-reply request failed");
                self.issue_log.fatal(format!("envelope-reply request to '{service}' failed: {e}"));
                frame.reply(self.identity.self_address(), json!({"error": e.to_string()}), "rep")
            }
        }
    }

    async fn dispatch_self_message_type(&self, client_id: &str, frame: &FramedMessage) -> ClientDispatchOutcome {
        match frame.msg_type.as_deref() {
            Some("log") => {
                self.issue_log.info(frame.body.to_string());
                ClientDispatchOutcome::Handled
            }
            Some("ping") => ClientDispatchOutcome::Reply(frame.reply(
                self.identity.self_address(),
                json!({}),
                "pong",
            ).with_type("pong")),
            Some("reconnect") => self.handle_reconnect(client_id, frame).await,
            Some("wsdir.loc") => {
                let requested = frame.body.get("clientID").and_then(|v| v.as_str()).unwrap_or_default();
                let router_id = self.directory.locate(requested).unwrap_or_default();
                ClientDispatchOutcome::Reply(frame.reply(
                    self.identity.self_address(),
                    json!({"routerID": router_id, "clientID": requested}),
                    "loc",
                ))
            }
            _ => match self.dispatch_self_admin(frame).await {
                Some(reply) => ClientDispatchOutcome::Reply(reply),
                None => ClientDispatchOutcome::Handled,
            },
        }
    }

    /// Reconnect handshake (§4.4 step 4, §4.5): rebind the connection to
    /// the claimed id, gossip the rebind, then drain the offline queue.
    async fn handle_reconnect(&self, client_id: &str, frame: &FramedMessage) -> ClientDispatchOutcome {
        let claimed_id = match frame.body.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return ClientDispatchOutcome::Disconnect(error_frame("reconnect missing id")),
        };

        let Some(sink) = self.directory.rebind(client_id, &claimed_id) else {
            return ClientDispatchOutcome::Disconnect(error_frame("no connection to rebind"));
        };

        let _ = self.gossip_directory_change(client_id, &claimed_id).await;

        let mut drained = 0;
        loop {
            match self.offline_queue.dequeue(&claimed_id).await {
                Ok(Some(queued)) => {
                    if sink.send(&queued).await.is_ok() {
                        let _ = self.offline_queue.complete(&claimed_id, &queued).await;
                        drained += 1;
                    } else {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, client_id = %claimed_id, "offline queue drain failed");
                    self.issue_log.error(format!("drain for '{claimed_id}' failed: {e}"));
                    break;
                }
            }
        }

        ClientDispatchOutcome::Reconnected { new_client_id: claimed_id, drained }
    }

    async fn gossip_directory_change(&self, old_id: &str, new_id: &str) -> Result<()> {
        let del = FramedMessage::new(
            format!("*@{}:/", self.identity.service),
            self.identity.self_address(),
            json!({"type": "wsdir.del", "routerID": self.identity.instance, "clientID": old_id}),
            "del",
        );
        self.registry.publish_broadcast(&del).await?;
        let add = FramedMessage::new(
            format!("*@{}:/", self.identity.service),
            self.identity.self_address(),
            json!({"type": "wsdir.add", "routerID": self.identity.instance, "clientID": new_id}),
            "add",
        );
        self.registry.publish_broadcast(&add).await
    }

    /// Step 5 / B4: hand a `forward`-bearing frame to a locally connected
    /// client, relay it to the owning replica, or enqueue it offline.
    async fn dispatch_forward(&self, frame: &FramedMessage) -> Result<()> {
        let forward = frame.forward.as_deref().ok_or_else(|| GatewayError::InvalidFrame("missing forward".into()))?;
        let addr = parse_route(forward)?;
        let Some(client_id) = addr.instance else {
            return Err(GatewayError::InvalidFrame("forward address missing instance".into()));
        };

        if let Some(sink) = self.directory.get_local(&client_id) {
            return sink.send(frame).await;
        }

        if let Some(router_id) = self.directory.locate(&client_id) {
            let mut relayed = frame.clone();
            relayed.to = format!("{}@{}:/", router_id, self.identity.service);
            return self.registry.send_message(&relayed).await;
        }

        self.offline_queue.enqueue(&client_id, frame).await
    }

    /// Step 6: dispatch to a service instance, carrying a `via` tag so
    /// the reply can be correlated back to the originating client.
    async fn dispatch_to_service(
        &self,
        client_id: &str,
        to_addr: &crate::message::RouteAddr,
        frame: &FramedMessage,
    ) -> Result<Option<FramedMessage>> {
        let via = format!("{}-{}@{}:/", self.identity.instance, client_id, self.identity.service);

        if let Some(instance) = &to_addr.instance {
            let mut directed = frame.clone();
            directed.via = Some(via);
            directed.to = format!("{}@{}:/", instance, to_addr.service);
            self.registry.send_message(&directed).await?;
            return Ok(None);
        }

        let instances = self.registry.fetch_instances(&to_addr.service).await?;
        let Some(instance) = instances.first() else {
            self.error_stats.log(&to_addr.service);
            return Ok(Some(frame.reply(
                self.identity.self_address(),
                json!({"error": format!("No {} instances available", to_addr.service)}),
                "err",
            )));
        };

        let mut directed = frame.clone();
        directed.via = Some(via);
        directed.to = format!("{}@{}:/", instance.id, to_addr.service);
        self.registry.send_message(&directed).await?;
        Ok(None)
    }

    /// Entry point for source (B): a frame read off the registry
    /// broadcast channel.
    pub async fn handle_registry_frame(&self, frame: FramedMessage) {
        if let Err(e) = self.handle_registry_frame_inner(frame).await {
            tracing::error!(error = %e, "registry frame dispatch failed");
            self.issue_log.error(format!("registry frame dispatch failed: {e}"));
        }
    }

    async fn handle_registry_frame_inner(&self, frame: FramedMessage) -> Result<()> {
        // B1: refresh action.
        if frame.body.get("action").and_then(|v| v.as_str()) == Some("refresh") {
            let service_name = frame.body.get("serviceName").and_then(|v| v.as_str());
            self.refresh_routes(service_name).await?;
            return Ok(());
        }

        // B2: directory gossip, addressed to a router id that isn't us.
        if let Some(msg_type) = frame.msg_type.clone() {
            if msg_type.starts_with("wsdir.") {
                return self.apply_directory_gossip(&msg_type, &frame).await;
            }
        }

        // B3: reply correlation via the `via` tag.
        if let Some(via) = &frame.via {
            if let Some(sub_id) = extract_sub_id(via) {
                let mut stripped = frame.clone();
                stripped.via = None;
                if let Some(sink) = self.directory.get_local(&sub_id) {
                    return sink.send(&stripped).await;
                }
                return self.offline_queue.enqueue(&sub_id, &stripped).await;
            }
        }

        // B4: forwarded frame, same policy as step 5.
        if frame.forward.is_some() {
            return self.dispatch_forward(&frame).await;
        }

        Ok(())
    }

    async fn apply_directory_gossip(&self, msg_type: &str, frame: &FramedMessage) -> Result<()> {
        let router_id = frame.body.get("routerID").and_then(|v| v.as_str()).unwrap_or_default();
        if router_id.is_empty() || router_id == self.identity.instance {
            return Ok(());
        }

        match msg_type {
            "wsdir.add" => {
                let client_id = frame.body.get("clientID").and_then(|v| v.as_str()).unwrap_or_default();
                self.directory.mark_present(router_id, client_id);
            }
            "wsdir.del" => {
                let client_id = frame.body.get("clientID").and_then(|v| v.as_str()).unwrap_or_default();
                self.directory.remove_from_router(router_id, client_id);
            }
            "wsdir.rem" => {
                self.directory.remove_router(router_id);
            }
            "wsdir.sha" => {
                let reply = FramedMessage::new(
                    frame.from.clone(),
                    self.identity.self_address(),
                    json!({
                        "type": "wsdir.dir",
                        "routerID": self.identity.instance,
                        "clients": self.directory.local_snapshot().into_iter().collect::<Vec<_>>(),
                    }),
                    "sha",
                )
                .with_type("wsdir.dir");
                self.registry.send_message(&reply).await?;
            }
            "wsdir.dir" => {
                let ids = frame
                    .body
                    .get("clients")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                self.directory.adopt_router_set(router_id, ids);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Parse the client-id out of a `via` tag
/// (`<instance>-<clientId>@<service>:/`). Both halves are generated as
/// dash-free ids (see `ids.rs`), so splitting on the first `-` is safe.
fn extract_sub_id(via: &str) -> Option<String> {
    let left = via.split('@').next()?;
    let (_, client_id) = left.split_once('-')?;
    Some(client_id.to_string())
}

impl FramedMessage {
    /// Builder-style helper for setting `type` post-construction.
    pub fn with_type(mut self, msg_type: &str) -> Self {
        self.msg_type = Some(msg_type.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ClientSink;
    use crate::gateway::GatewayIdentity;
    use crate::registry::{Instance, InMemoryRegistryClient};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        received: Mutex<Vec<FramedMessage>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink { received: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn send(&self, msg: &FramedMessage) -> Result<()> {
            self.received.lock().unwrap().push(msg.clone());
            Ok(())
        }
        fn remote_ip(&self) -> String {
            "127.0.0.1".to_string()
        }
    }

    fn test_gateway() -> Arc<Gateway> {
        config::init(config::FileConfig::default(), "cfg-test".to_string());
        let registry = Arc::new(
            InMemoryRegistryClient::new()
                .with_instance("orders", Instance { id: "ord-1".to_string(), addr: None }),
        );
        Gateway::new(
            GatewayIdentity { service: "router".to_string(), instance: "gwinst1".to_string() },
            registry,
            "hydra-router:message:queue",
        )
    }

    #[tokio::test]
    async fn extract_sub_id_splits_on_first_dash() {
        assert_eq!(extract_sub_id("gwinst1-client99@router:/").as_deref(), Some("client99"));
    }

    #[tokio::test]
    async fn ping_replies_with_pong_carrying_rmid() {
        let gw = test_gateway();
        let sink = RecordingSink::new();
        gw.directory.open("client1", sink);
        let frame = FramedMessage::new("router", "client1@anyclient:/", json!({}), "tr1").with_type("ping");
        match gw.handle_client_frame("client1", &serde_json::to_string(&frame.to_short_json()).unwrap()).await {
            ClientDispatchOutcome::Reply(reply) => {
                assert_eq!(reply.msg_type.as_deref(), Some("pong"));
                assert_eq!(reply.rmid.as_deref(), Some(frame.mid.as_str()));
            }
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn directed_send_with_instance_carries_via_tag() {
        let gw = test_gateway();
        let frame = FramedMessage::new("ord-1@orders:/", "client1@anyclient:/", json!({}), "tr1");
        let outcome = gw
            .handle_client_frame("client1", &serde_json::to_string(&frame.to_short_json()).unwrap())
            .await;
        assert!(matches!(outcome, ClientDispatchOutcome::Handled));
    }

    #[tokio::test]
    async fn missing_instances_replies_with_error_and_bumps_error_stats() {
        let gw = test_gateway();
        let frame = FramedMessage::new("billing", "client1@anyclient:/", json!({}), "tr1");
        match gw.handle_client_frame("client1", &serde_json::to_string(&frame.to_short_json()).unwrap()).await {
            ClientDispatchOutcome::Reply(reply) => {
                assert!(reply.body.get("error").is_some());
            }
            _ => panic!("expected error reply"),
        }
        assert!(gw.error_stats.snapshot("billing").unwrap().last_1s >= 1);
    }

    #[tokio::test]
    async fn gossip_add_and_remove_round_trip() {
        let gw = test_gateway();
        let add = FramedMessage::new(
            "gwinst1@router:/",
            "gwinst2@router:/",
            json!({"routerID": "gwinst2", "clientID": "remote-client"}),
            "g1",
        )
        .with_type("wsdir.add");
        gw.handle_registry_frame(add).await;
        assert_eq!(gw.directory.locate("remote-client").as_deref(), Some("gwinst2"));

        let rem = FramedMessage::new(
            "gwinst1@router:/",
            "gwinst2@router:/",
            json!({"routerID": "gwinst2"}),
            "g2",
        )
        .with_type("wsdir.rem");
        gw.handle_registry_frame(rem).await;
        assert!(gw.directory.locate("remote-client").is_none());
    }

    #[tokio::test]
    async fn gossip_from_self_is_ignored() {
        let gw = test_gateway();
        let add = FramedMessage::new(
            "gwinst1@router:/",
            "gwinst1@router:/",
            json!({"routerID": "gwinst1", "clientID": "should-not-apply"}),
            "g1",
        )
        .with_type("wsdir.add");
        gw.handle_registry_frame(add).await;
        assert!(gw.directory.locate("should-not-apply").is_none());
    }

    #[tokio::test]
    async fn via_reply_delivers_to_local_client_and_strips_via() {
        let gw = test_gateway();
        let sink = RecordingSink::new();
        gw.directory.open("client1", sink.clone());

        let reply = FramedMessage::new(
            "gwinst1@router:/",
            "ord-1@orders:/",
            json!({"ok": true}),
            "tr2",
        );
        let mut reply = reply;
        reply.via = Some("gwinst1-client1@router:/".to_string());
        gw.handle_registry_frame(reply).await;

        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(received[0].via.is_none());
    }

    #[tokio::test]
    async fn via_reply_enqueues_when_client_not_local() {
        let gw = test_gateway();
        let mut reply = FramedMessage::new("gwinst1@router:/", "ord-1@orders:/", json!({"ok": true}), "tr2");
        reply.via = Some("gwinst1-offlineclient@router:/".to_string());
        gw.handle_registry_frame(reply).await;

        let next = gw.offline_queue.dequeue("offlineclient").await.unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn reconnect_rebinds_and_drains_queue_in_order() {
        let gw = test_gateway();
        let sink = RecordingSink::new();
        gw.directory.open("tempid", sink.clone());

        for i in 0..3 {
            let msg = FramedMessage::new("claimedid", "svc@router:/", json!({"i": i}), "tr");
            gw.offline_queue.enqueue("claimedid", &msg).await.unwrap();
        }

        let reconnect = FramedMessage::new("router", "tempid@anyclient:/", json!({"id": "claimedid"}), "rc")
            .with_type("reconnect");
        let outcome = gw
            .handle_client_frame("tempid", &serde_json::to_string(&reconnect.to_short_json()).unwrap())
            .await;

        match outcome {
            ClientDispatchOutcome::Reconnected { new_client_id, drained } => {
                assert_eq!(new_client_id, "claimedid");
                assert_eq!(drained, 3);
            }
            _ => panic!("expected Reconnected outcome"),
        }

        let received = sink.received.lock().unwrap();
        let order: Vec<i64> = received.iter().map(|m| m.body["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(gw.directory.is_local("claimedid"));
        assert!(!gw.directory.is_local("tempid"));
    }

    #[tokio::test]
    async fn forward_to_local_client_delivers_directly() {
        let gw = test_gateway();
        let sink = RecordingSink::new();
        gw.directory.open("client1", sink.clone());

        let mut frame = FramedMessage::new("router", "ord-1@orders:/", json!({"hello": true}), "tr");
        frame.forward = Some("client1@router:/".to_string());
        gw.handle_registry_frame(frame).await;

        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forward_to_unknown_client_enqueues_offline() {
        let gw = test_gateway();
        let mut frame = FramedMessage::new("router", "ord-1@orders:/", json!({"hello": true}), "tr");
        frame.forward = Some("ghost@router:/".to_string());
        gw.handle_registry_frame(frame).await;

        let queued = gw.offline_queue.dequeue("ghost").await.unwrap();
        assert!(queued.is_some());
    }
}
