//! Persistent framed-message channel over `actix-ws` (§4.5, §6.3).
//!
//! `WsSink` is the `ClientSink` implementation the design notes (§9) ask
//! for: a non-owning handle `router-core`'s dispatch engine sends
//! through, without knowing anything about actix-ws.

use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::json;

use router_core::directory::ClientSink;
use router_core::error::Result as CoreResult;
use router_core::gateway::Gateway;
use router_core::ids::gen_client_id;
use router_core::message::FramedMessage;
use router_core::router::ClientDispatchOutcome;

pub struct WsSink {
    session: actix_ws::Session,
}

#[async_trait]
impl ClientSink for WsSink {
    async fn send(&self, msg: &FramedMessage) -> CoreResult<()> {
        let mut session = self.session.clone();
        let text = serde_json::to_string(&msg.to_short_json()).unwrap_or_default();
        session.text(text).await.map_err(|_| router_core::error::GatewayError::QueueFailure("ws session closed".into()))
    }

    fn remote_ip(&self) -> String {
        String::new()
    }
}

fn detect_ip(req: &HttpRequest) -> String {
    if let Some(forwarded) = req.headers().get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    req.peer_addr().map(|addr| addr.ip().to_string()).unwrap_or_else(|| "unknown".to_string())
}

pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    gateway: web::Data<Arc<Gateway>>,
) -> actix_web::Result<HttpResponse> {
    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let client_id = gen_client_id();
    let ip = detect_ip(&req);
    let gateway = gateway.into_inner();

    let sink: Arc<dyn ClientSink> = Arc::new(WsSink { session: session.clone() });
    gateway.directory.open(&client_id, sink);

    let welcome = FramedMessage::new(
        format!("{}@{}:/", client_id, gateway.identity.service),
        gateway.identity.self_address(),
        json!({"id": client_id, "ip": ip}),
        "hello",
    )
    .with_type("connection");
    let _ = session.text(serde_json::to_string(&welcome.to_short_json()).unwrap_or_default()).await;

    let gossip_add = FramedMessage::new(
        format!("*@{}:/", gateway.identity.service),
        gateway.identity.self_address(),
        json!({"type": "wsdir.add", "routerID": gateway.identity.instance, "clientID": client_id}),
        "add",
    );
    let _ = gateway.registry.publish_broadcast(&gossip_add).await;

    let mut current_id = client_id;

    actix_web::rt::spawn(async move {
        use futures_util::StreamExt;

        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                actix_ws::Message::Text(text) => {
                    match gateway.handle_client_frame(&current_id, &text).await {
                        ClientDispatchOutcome::Reply(reply) => {
                            let text = serde_json::to_string(&reply.to_short_json()).unwrap_or_default();
                            if session.text(text).await.is_err() {
                                break;
                            }
                        }
                        ClientDispatchOutcome::Reconnected { new_client_id, .. } => {
                            current_id = new_client_id;
                        }
                        ClientDispatchOutcome::Handled => {}
                        ClientDispatchOutcome::Disconnect(err_frame) => {
                            let text = serde_json::to_string(&err_frame.to_short_json()).unwrap_or_default();
                            let _ = session.text(text).await;
                            break;
                        }
                    }
                }
                actix_ws::Message::Ping(bytes) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                actix_ws::Message::Close(_) => break,
                _ => {}
            }
        }

        gateway.directory.close(&current_id);
        let gossip_del = FramedMessage::new(
            format!("*@{}:/", gateway.identity.service),
            gateway.identity.self_address(),
            json!({"type": "wsdir.del", "routerID": gateway.identity.instance, "clientID": current_id}),
            "del",
        );
        let _ = gateway.registry.publish_broadcast(&gossip_del).await;
        let _ = session.close(None).await;
    });

    Ok(response)
}
