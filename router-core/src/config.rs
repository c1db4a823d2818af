//! Configuration keys for the gateway, backed by `mini-config`.
//!
//! Follows the shape of the teacher's `router-core/src/config.rs`
//! (`RoutingData` enum + `init()`): a `Configure`-derived enum whose
//! variants are typed keys into a process-wide store, populated once at
//! startup from a YAML file merged with environment overrides.

use mini_config::Configure;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration keys recognized by the gateway (§6.5).
#[derive(Debug, Clone, Configure)]
pub enum Router {
    /// Seconds to wait on a forwarded registry call before timing out.
    RequestTimeout,
    /// Raise the tracing filter to `debug` when true.
    DebugLogging,
    /// When true, all admin routes 404 except static asset suffixes.
    DisableRouterEndpoint,
    /// UUIDv4 token required of non-localhost callers on admin routes.
    RouterToken,
    /// Header overrides applied to every forwarded response.
    Cors,
    /// Require and verify a `signature` on every inbound framed message.
    ForceMessageSignature,
    /// Shared secret used for HMAC-SHA256 signing/verification.
    SignatureSharedSecret,
    /// External base-URL → pattern mapping, passed through to RouteTable.
    ExternalRoutes,
    /// Offline-queue store logical database index.
    QueuerDB,
    /// Bind interface for outbound registry calls.
    ServiceInterface,
    /// Key prefix for offline-queue list names.
    QueueBase,
    /// This gateway's own service name, as registered with the registry.
    SelfService,
    /// This gateway's own instance id.
    SelfInstance,
}

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_QUEUE_BASE: &str = "hydra-router:message:queue";
pub const DEFAULT_SELF_SERVICE: &str = "router";

/// Shape of the YAML configuration file. Every field is optional; absent
/// fields fall back to the defaults documented in §6.5.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default)]
    pub request_timeout: Option<u64>,
    #[serde(default)]
    pub debug_logging: Option<bool>,
    #[serde(default)]
    pub disable_router_endpoint: Option<bool>,
    #[serde(default)]
    pub router_token: Option<String>,
    #[serde(default)]
    pub cors: Option<HashMap<String, String>>,
    #[serde(default)]
    pub force_message_signature: Option<bool>,
    #[serde(default)]
    pub signature_shared_secret: Option<String>,
    #[serde(default)]
    pub external_routes: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub queuer_db: Option<i64>,
    #[serde(default)]
    pub service_interface: Option<String>,
    #[serde(default)]
    pub queue_base: Option<String>,
    #[serde(default)]
    pub self_service: Option<String>,
    #[serde(default)]
    pub self_instance: Option<String>,
}

/// Populate the `Router` config store from a file config, applying
/// environment variable overrides (`HYDRA_<KEY>`, upper-snake) on top,
/// then filling in defaults for anything still unset.
pub fn init(file: FileConfig, self_instance: String) {
    let request_timeout = env_override("HYDRA_REQUEST_TIMEOUT")
        .and_then(|v| v.parse::<u64>().ok())
        .or(file.request_timeout)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    Router::RequestTimeout.xset::<u64>(request_timeout);

    let debug_logging = env_bool("HYDRA_DEBUG_LOGGING").or(file.debug_logging).unwrap_or(false);
    Router::DebugLogging.xset::<bool>(debug_logging);

    let disable_router_endpoint =
        env_bool("HYDRA_DISABLE_ROUTER_ENDPOINT").or(file.disable_router_endpoint).unwrap_or(false);
    Router::DisableRouterEndpoint.xset::<bool>(disable_router_endpoint);

    let router_token = env_override("HYDRA_ROUTER_TOKEN").or(file.router_token).unwrap_or_default();
    Router::RouterToken.set(router_token.as_str());

    Router::Cors.xset::<HashMap<String, String>>(file.cors.unwrap_or_default());

    let force_sig =
        env_bool("HYDRA_FORCE_MESSAGE_SIGNATURE").or(file.force_message_signature).unwrap_or(false);
    Router::ForceMessageSignature.xset::<bool>(force_sig);

    let secret = env_override("HYDRA_SIGNATURE_SHARED_SECRET")
        .or(file.signature_shared_secret)
        .unwrap_or_default();
    Router::SignatureSharedSecret.set(secret.as_str());

    Router::ExternalRoutes.xset::<HashMap<String, Vec<String>>>(file.external_routes.unwrap_or_default());

    let queuer_db = env_override("HYDRA_QUEUER_DB")
        .and_then(|v| v.parse::<i64>().ok())
        .or(file.queuer_db)
        .unwrap_or(0);
    Router::QueuerDB.xset::<i64>(queuer_db);

    let iface = env_override("HYDRA_SERVICE_INTERFACE").or(file.service_interface).unwrap_or_default();
    Router::ServiceInterface.set(iface.as_str());

    let queue_base = env_override("HYDRA_QUEUE_BASE")
        .or(file.queue_base)
        .unwrap_or_else(|| DEFAULT_QUEUE_BASE.to_string());
    Router::QueueBase.set(queue_base.as_str());

    let self_service =
        env_override("HYDRA_SELF_SERVICE").or(file.self_service).unwrap_or_else(|| DEFAULT_SELF_SERVICE.to_string());
    Router::SelfService.set(self_service.as_str());

    let self_instance = env_override("HYDRA_SELF_INSTANCE").or(file.self_instance).unwrap_or(self_instance);
    Router::SelfInstance.set(self_instance.as_str());
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_override(key).map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_empty() {
        init(FileConfig::default(), "inst-test-defaults".to_string());
        assert_eq!(Router::RequestTimeout.xget::<u64>(), DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(Router::QueueBase.get::<String>(), DEFAULT_QUEUE_BASE);
        assert_eq!(Router::SelfService.get::<String>(), DEFAULT_SELF_SERVICE);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = FileConfig::default();
        file.request_timeout = Some(9);
        file.queue_base = Some("custom:queue".to_string());
        init(file, "inst-test-file".to_string());
        assert_eq!(Router::RequestTimeout.xget::<u64>(), 9);
        assert_eq!(Router::QueueBase.get::<String>(), "custom:queue");
    }
}
