//! Router API: the gateway's HTTP and websocket surface.
//!
//! Bootstraps a `router_core::Gateway`, wires it to the registry's
//! broadcast stream, mounts the admin routes and the forwarding
//! catch-all, and serves persistent client connections over `/ws`.
//! Shaped like the teacher's `main.rs` (CORS via `actix-cors`, request
//! logging via `actix_web::middleware::Logger`, clap args), but the
//! client/SQLite/JWT stack is replaced with the registry-backed gateway.

mod admin;
mod config;
mod forwarder;
mod middleware;
mod ws;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{middleware as actix_middleware, web, App, HttpRequest, HttpResponse, HttpServer};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use router_core::config::Router as ConfigKey;
use router_core::gateway::{Gateway, GatewayIdentity, SecurityPolicy};
use router_core::ids::gen_instance_id;
use router_core::registry::HttpRegistryClient;

use crate::admin::GatewayAdminSurface;
use crate::config::Args;
use crate::middleware::router_token::RouterTokenAuth;

/// Forward any request not claimed by the admin routes or `/ws` to the
/// service its path resolves to (§4.3, §4.2's refresh+fallback policy).
async fn dispatch(req: HttpRequest, gateway: web::Data<Arc<Gateway>>, body: web::Bytes) -> HttpResponse {
    let path = req.path().to_string();

    if let Some(m) = gateway.routes.lookup(&path) {
        return forwarder::forward(&gateway, &req, &m.service, &path, body).await;
    }

    let referer = req.headers().get("referer").and_then(|v| v.to_str().ok());
    if let Some((service, forwarded)) = gateway.routes.fallback(&path, referer) {
        return forwarder::forward(&gateway, &req, &service, &forwarded, body).await;
    }

    HttpResponse::NotFound().finish()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let self_instance = gen_instance_id();
    let file_config = config::load_file_config(args.config.as_deref());
    router_core::config::init(file_config, self_instance.clone());

    let filter = if ConfigKey::DebugLogging.xget::<bool>() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn,router_api=info,router_core=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let self_service = ConfigKey::SelfService.get::<String>();
    let registry_url = args.registry_url.clone().unwrap_or_else(|| "http://127.0.0.1:7000".to_string());
    let registry = Arc::new(HttpRegistryClient::new(registry_url));

    let security = SecurityPolicy {
        force_message_signature: ConfigKey::ForceMessageSignature.xget::<bool>(),
        signature_shared_secret: ConfigKey::SignatureSharedSecret.get::<String>(),
    };

    let gateway = Gateway::with_security(
        GatewayIdentity { service: self_service, instance: self_instance },
        registry,
        ConfigKey::QueueBase.get::<String>(),
        security,
    );
    gateway.set_admin_surface(Arc::new(GatewayAdminSurface));

    if let Err(e) = gateway.refresh_routes(None).await {
        tracing::warn!(error = %e, "initial route refresh failed, continuing with an empty table");
    }
    if let Err(e) = gateway.register_self().await {
        tracing::warn!(error = %e, "failed to register self with the registry");
    }
    if let Err(e) = gateway.announce_startup().await {
        tracing::warn!(error = %e, "failed to announce startup to peer replicas");
    }

    {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            match gateway.registry.subscribe_broadcast().await {
                Ok(mut rx) => {
                    while let Some(frame) = rx.recv().await {
                        gateway.handle_registry_frame(frame).await;
                    }
                }
                Err(e) => tracing::error!(error = %e, "broadcast subscription failed, gossip disabled"),
            }
        });
    }

    tracing::info!(bind = %args.bind_address(), workers = args.workers, "starting router-api");

    let bind_address = args.bind_address();
    let workers = args.workers;
    let server_gateway = gateway.clone();

    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_gateway.clone()))
            .wrap(actix_middleware::Logger::default())
            .wrap(cors)
            .service(web::resource("/ws").route(web::get().to(ws::ws_route)))
            .service(web::scope("/v1/router").wrap(RouterTokenAuth).configure(admin::configure))
            .default_service(web::route().to(dispatch))
    })
    .bind(&bind_address)?
    .workers(workers)
    .run()
    .await;

    gateway.announce_shutdown().await;
    result?;
    Ok(())
}
