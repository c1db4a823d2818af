//! AdminSurface: handlers for the routes the gateway owns itself (§4.8).
//!
//! Route registration follows the teacher's `api/settings/*` convention
//! (`#[get("/path")]` macros mounted via a `configure(cfg: &mut
//! web::ServiceConfig)` function, per `api/mod.rs`). The core logic for
//! each endpoint is a plain async function returning `serde_json::Value`
//! so it can be shared between the HTTP handlers below and
//! `GatewayAdminSurface`, which answers the same operations when they
//! arrive as method-tagged framed messages over the websocket (§4.4 step 3).

use std::sync::Arc;
use std::time::Duration;

use actix_web::{get, post, web, HttpResponse, Responder};
use async_trait::async_trait;
use serde_json::{json, Value};

use router_core::config::Router as ConfigKey;
use router_core::gateway::{AdminSurface, Gateway};
use router_core::message::{parse_route, FramedMessage};

const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

async fn list_routes(gateway: &Gateway) -> Value {
    let mut out = serde_json::Map::new();
    for service in gateway.routes.services() {
        let patterns = gateway.routes.patterns(&service);
        out.insert(service, json!(patterns));
    }
    json!(out)
}

async fn list_services(gateway: &Gateway) -> Value {
    json!(gateway.routes.services())
}

async fn list_nodes(gateway: &Gateway) -> Value {
    match gateway.registry.fetch_routes(None).await {
        Ok(defs) => json!(defs.into_iter().map(|d| d.service).collect::<Vec<_>>()),
        Err(_) => json!([]),
    }
}

async fn list_wsdir(gateway: &Gateway) -> Value {
    let global = gateway.directory.global_snapshot();
    let mut out = serde_json::Map::new();
    for (router_id, clients) in global {
        out.insert(router_id, json!(clients.into_iter().collect::<Vec<_>>()));
    }
    json!(out)
}

async fn stats_snapshot(gateway: &Gateway) -> Value {
    let render = |ring: &router_core::stats::StatsRing| {
        let mut out = serde_json::Map::new();
        for target in ring.targets() {
            if let Some(snap) = ring.snapshot(&target) {
                out.insert(
                    target,
                    json!({
                        "last1s": snap.last_1s, "last1m": snap.last_1m, "last5m": snap.last_5m,
                        "last15m": snap.last_15m, "last30m": snap.last_30m, "last1h": snap.last_1h,
                    }),
                );
            }
        }
        Value::Object(out)
    };
    json!({
        "http": render(&gateway.http_stats),
        "ws": render(&gateway.ws_stats),
        "error": render(&gateway.error_stats),
    })
}

/// Implements the self-addressed message side of the admin surface
/// (§4.4 step 3/4): framed messages whose `to` names this gateway.
pub struct GatewayAdminSurface;

#[async_trait]
impl AdminSurface for GatewayAdminSurface {
    async fn handle_self_message(&self, gateway: &Gateway, frame: &FramedMessage) -> Option<FramedMessage> {
        let addr = parse_route(&frame.to).ok()?;
        let api_route = addr.api_route.as_deref().unwrap_or("/");
        let method = addr.method.as_deref().unwrap_or("get");

        let body = match (method, api_route) {
            ("get", "/v1/router/health") => gateway.registry.fetch_health().await.ok()?,
            ("get", route) if route.starts_with("/v1/router/list/") => {
                match route.rsplit('/').next().unwrap_or("") {
                    "routes" => list_routes(gateway).await,
                    "services" => list_services(gateway).await,
                    "nodes" => list_nodes(gateway).await,
                    "wsdir" => list_wsdir(gateway).await,
                    _ => json!({"error": "unknown list target"}),
                }
            }
            ("get", "/v1/router/version") => json!({"version": GATEWAY_VERSION}),
            ("get", "/v1/router/clear") => {
                let _ = gateway.registry.clear_stale_presence().await;
                json!({"cleared": true})
            }
            ("get", route) if route.starts_with("/v1/router/refresh") => {
                let service = route.strip_prefix("/v1/router/refresh/").filter(|s| !s.is_empty());
                match gateway.refresh_routes(service).await {
                    Ok(()) => json!({"refreshed": true}),
                    Err(e) => json!({"error": e.to_string()}),
                }
            }
            ("get", "/v1/router/log") => json!(gateway.issue_log.snapshot()),
            ("get", "/v1/router/stats") => stats_snapshot(gateway).await,
            _ => json!({"error": format!("unknown admin route {} {}", method, api_route)}),
        };

        Some(frame.reply(gateway.identity.self_address(), body, "adm"))
    }
}

#[get("/health")]
async fn health(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    match gateway.registry.fetch_health().await {
        Ok(v) => HttpResponse::Ok().json(v),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[get("/list/{thing}")]
async fn list(gateway: web::Data<Arc<Gateway>>, thing: web::Path<String>) -> impl Responder {
    let body = match thing.as_str() {
        "routes" => list_routes(&gateway).await,
        "services" => list_services(&gateway).await,
        "nodes" => list_nodes(&gateway).await,
        "wsdir" => list_wsdir(&gateway).await,
        _ => return HttpResponse::NotFound().finish(),
    };
    HttpResponse::Ok().json(body)
}

#[get("/version")]
async fn version() -> impl Responder {
    HttpResponse::Ok().json(json!({"version": GATEWAY_VERSION}))
}

#[get("/clear")]
async fn clear(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    match gateway.registry.clear_stale_presence().await {
        Ok(()) => HttpResponse::Ok().json(json!({"cleared": true})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[get("/refresh")]
async fn refresh_all(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    match gateway.refresh_routes(None).await {
        Ok(()) => HttpResponse::Ok().json(json!({"refreshed": true})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[get("/refresh/{service}")]
async fn refresh_one(gateway: web::Data<Arc<Gateway>>, service: web::Path<String>) -> impl Responder {
    match gateway.refresh_routes(Some(&service)).await {
        Ok(()) => HttpResponse::Ok().json(json!({"refreshed": true, "service": service.as_str()})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[get("/log")]
async fn log(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    HttpResponse::Ok().json(gateway.issue_log.snapshot())
}

#[get("/stats")]
async fn stats(gateway: web::Data<Arc<Gateway>>) -> impl Responder {
    HttpResponse::Ok().json(stats_snapshot(&gateway).await)
}

#[post("/message")]
async fn message(gateway: web::Data<Arc<Gateway>>, body: web::Bytes) -> impl Responder {
    let frame = match serde_json::from_slice::<Value>(&body).and_then(|v| {
        FramedMessage::from_value(v).map_err(|e| serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))
    }) {
        Ok(f) => f,
        Err(e) => return HttpResponse::BadRequest().json(json!({"result": {"reason": e.to_string()}})),
    };

    let mut envelope = frame.clone();
    envelope.to = frame.forward.clone().unwrap_or_else(|| frame.to.clone());
    let timeout = Duration::from_secs(ConfigKey::RequestTimeout.xget::<u64>());
    match gateway.registry.make_api_request(&envelope, timeout).await {
        Ok(resp) => {
            let status = actix_web::http::StatusCode::from_u16(resp.status).unwrap_or(actix_web::http::StatusCode::OK);
            let body: Value = serde_json::from_slice(&resp.body).unwrap_or(Value::Null);
            HttpResponse::build(status).json(body)
        }
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[post("/send")]
async fn send(gateway: web::Data<Arc<Gateway>>, body: web::Bytes) -> impl Responder {
    let frame = match serde_json::from_slice::<Value>(&body).and_then(|v| {
        FramedMessage::from_value(v).map_err(|e| serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))
    }) {
        Ok(f) => f,
        Err(e) => return HttpResponse::BadRequest().json(json!({"result": {"reason": e.to_string()}})),
    };

    match gateway.registry.send_message(&frame).await {
        Ok(()) => HttpResponse::Ok().json(json!({"mid": frame.mid})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

#[post("/queue")]
async fn queue(gateway: web::Data<Arc<Gateway>>, body: web::Bytes) -> impl Responder {
    let frame = match serde_json::from_slice::<Value>(&body).and_then(|v| {
        FramedMessage::from_value(v).map_err(|e| serde_json::Error::io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))
    }) {
        Ok(f) => f,
        Err(e) => return HttpResponse::BadRequest().json(json!({"result": {"reason": e.to_string()}})),
    };

    let Ok(to_addr) = parse_route(&frame.to) else {
        return HttpResponse::BadRequest().json(json!({"result": {"reason": "malformed to"}}));
    };
    let recipient = to_addr.instance.unwrap_or(to_addr.service);

    match gateway.offline_queue.enqueue(&recipient, &frame).await {
        Ok(()) => HttpResponse::Ok().json(json!({"mid": frame.mid})),
        Err(e) => HttpResponse::InternalServerError().json(json!({"result": {"reason": e.to_string()}})),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(list)
        .service(version)
        .service(clear)
        .service(refresh_all)
        .service(refresh_one)
        .service(log)
        .service(stats)
        .service(message)
        .service(send)
        .service(queue);
}
