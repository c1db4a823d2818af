//! Gateway: the single process-wide instance the rest of the crate's
//! handlers are given a reference to (§5, §9 "no ambient globals").
//!
//! The Gateway ↔ AdminSurface relationship is circular in the source
//! system (admin handlers need gateway state; the gateway's dispatch
//! needs to call back into admin handlers for self-addressed messages).
//! Per §9's design note, this is modeled as a late-bound, non-owning
//! handle: `AdminSurface` is a trait implemented by `router-api`, set
//! once via `set_admin_surface` after both halves are constructed.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::directory::WsClientRegistry;
use crate::error::Result;
use crate::issue_log::IssueLog;
use crate::message::FramedMessage;
use crate::queue::OfflineQueue;
use crate::registry::RegistryClient;
use crate::route_table::RouteTable;
use crate::stats::StatsRing;

/// This gateway replica's own service name and instance id, used to
/// build `from`/`via` addresses and to recognize self-addressed messages.
#[derive(Debug, Clone)]
pub struct GatewayIdentity {
    pub service: String,
    pub instance: String,
}

impl GatewayIdentity {
    pub fn self_address(&self) -> String {
        format!("{}@{}:/", self.instance, self.service)
    }
}

/// Patterns the gateway registers for itself (§4.8). Stored with their
/// method tags, as published to the registry; never compiled into this
/// process's own `RouteTable` since `/v1/router/*` requests are
/// recognized by prefix in the HTTP layer, not via route lookup.
pub const ADMIN_ROUTE_PATTERNS: &[&str] = &[
    "[get]/",
    "[get]/index.css",
    "[get]/index.js",
    "[get]/v1/router/health",
    "[get]/v1/router/list/:thing",
    "[get]/v1/router/version",
    "[get]/v1/router/clear",
    "[get]/v1/router/refresh",
    "[get]/v1/router/refresh/:service",
    "[get]/v1/router/log",
    "[get]/v1/router/stats",
    "[post]/v1/router/message",
    "[post]/v1/router/send",
    "[post]/v1/router/queue",
];

/// Handlers for the routes the gateway owns itself (§4.8). Implemented
/// by `router-api`, which knows how to render HTTP responses; `router-core`
/// only needs to call back into it for self-addressed framed messages
/// (§4.4 step 3/4).
#[async_trait]
pub trait AdminSurface: Send + Sync {
    /// Handle a framed message addressed to this gateway (a method-tagged
    /// `to` whose service is ourselves, or a self-addressed message type
    /// handled in step 4). Returns the reply frame, if any.
    async fn handle_self_message(&self, gateway: &Gateway, frame: &FramedMessage) -> Option<FramedMessage>;
}

/// Signature-enforcement settings (§6.5 `forceMessageSignature` /
/// `signatureSharedSecret`), read from config once at startup and held
/// as plain fields rather than re-read from the global store per message.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub force_message_signature: bool,
    pub signature_shared_secret: String,
}

pub struct Gateway {
    pub identity: GatewayIdentity,
    pub routes: RouteTable,
    pub directory: WsClientRegistry,
    pub offline_queue: OfflineQueue,
    pub http_stats: StatsRing,
    pub ws_stats: StatsRing,
    pub error_stats: StatsRing,
    pub issue_log: IssueLog,
    pub registry: Arc<dyn RegistryClient>,
    pub security: SecurityPolicy,
    admin: RwLock<Option<Arc<dyn AdminSurface>>>,
}

impl Gateway {
    pub fn new(identity: GatewayIdentity, registry: Arc<dyn RegistryClient>, queue_base: impl Into<String>) -> Arc<Self> {
        Self::with_security(identity, registry, queue_base, SecurityPolicy::default())
    }

    pub fn with_security(
        identity: GatewayIdentity,
        registry: Arc<dyn RegistryClient>,
        queue_base: impl Into<String>,
        security: SecurityPolicy,
    ) -> Arc<Self> {
        let directory = WsClientRegistry::new(identity.instance.clone());
        let offline_queue = OfflineQueue::new(registry.clone(), queue_base);
        Arc::new(Gateway {
            identity,
            routes: RouteTable::new(),
            directory,
            offline_queue,
            http_stats: StatsRing::new(),
            ws_stats: StatsRing::new(),
            error_stats: StatsRing::new(),
            issue_log: IssueLog::new(),
            registry,
            security,
            admin: RwLock::new(None),
        })
    }

    /// Bind the admin surface after both halves exist (§9).
    pub fn set_admin_surface(&self, admin: Arc<dyn AdminSurface>) {
        *self.admin.write().expect("admin handle lock poisoned") = Some(admin);
    }

    pub fn admin_surface(&self) -> Option<Arc<dyn AdminSurface>> {
        self.admin.read().expect("admin handle lock poisoned").clone()
    }

    /// True when `service` names this gateway replica itself.
    pub fn is_self(&self, service: &str) -> bool {
        service == self.identity.service
    }

    /// Refresh one service's routes, or all services when `service` is `None` (§4.2).
    pub async fn refresh_routes(&self, service: Option<&str>) -> Result<()> {
        let defs = self.registry.fetch_routes(service).await?;
        for def in defs {
            self.routes.replace_service(&def.service, &def.patterns)?;
        }
        Ok(())
    }

    /// Publish this gateway's own presence and route list (§4.9).
    pub async fn register_self(&self) -> Result<()> {
        use crate::registry::SelfRegistration;
        self.registry
            .register_self(SelfRegistration {
                service: self.identity.service.clone(),
                instance: self.identity.instance.clone(),
                routes: ADMIN_ROUTE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            })
            .await
    }

    /// Broadcast `wsdir.sha`, asking peer replicas to share their directories (§4.5).
    pub async fn announce_startup(&self) -> Result<()> {
        let frame = FramedMessage::new(
            format!("*@{}:/", self.identity.service),
            self.identity.self_address(),
            serde_json::json!({"type": "wsdir.sha", "routerID": self.identity.instance}),
            "boot",
        );
        self.registry.publish_broadcast(&frame).await
    }

    /// Broadcast `wsdir.rem` and pause for the grace period before shutdown (§4.5, §5).
    pub async fn announce_shutdown(&self) {
        let frame = FramedMessage::new(
            format!("*@{}:/", self.identity.service),
            self.identity.self_address(),
            serde_json::json!({"type": "wsdir.rem", "routerID": self.identity.instance}),
            "halt",
        );
        if let Err(e) = self.registry.publish_broadcast(&frame).await {
            tracing::error!(error = %e, "shutdown gossip failed");
            self.issue_log.error(format!("shutdown gossip failed: {e}"));
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistryClient;

    fn test_gateway() -> Arc<Gateway> {
        let registry = Arc::new(InMemoryRegistryClient::new().with_route("orders", vec!["/v1/orders/:id".to_string()]));
        Gateway::new(
            GatewayIdentity { service: "router".to_string(), instance: "inst1".to_string() },
            registry,
            "hydra-router:message:queue",
        )
    }

    #[tokio::test]
    async fn refresh_routes_populates_route_table() {
        let gw = test_gateway();
        gw.refresh_routes(None).await.unwrap();
        assert!(gw.routes.lookup("/v1/orders/42").is_some());
    }

    #[test]
    fn is_self_matches_own_service_name() {
        let gw = test_gateway();
        assert!(gw.is_self("router"));
        assert!(!gw.is_self("orders"));
    }

    #[test]
    fn self_address_has_instance_at_service_form() {
        let gw = test_gateway();
        assert_eq!(gw.identity.self_address(), "inst1@router:/");
    }
}
