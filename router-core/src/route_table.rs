//! RouteTable: service-name → ordered pattern list, with atomic
//! per-service replacement (§3, §4.2).
//!
//! Copy-on-write per service, per §5's shared-resource policy: readers
//! never block on a writer mid-swap, and a lookup during a refresh sees
//! either the old list or the new one for that service, never a blend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::pattern::{compile, CompiledPattern, Captures};

/// One compiled route owned by a service.
#[derive(Debug, Clone)]
pub struct Route {
    pub service: String,
    pub pattern: CompiledPattern,
}

/// Outcome of a successful `RouteTable::lookup`.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub service: String,
    pub captures: Captures,
    pub literal_pattern: String,
}

struct Inner {
    /// Service names in first-registered order; fallback matching and
    /// `lookup` both iterate in this order.
    order: Vec<String>,
    routes: HashMap<String, Arc<Vec<Route>>>,
}

pub struct RouteTable {
    inner: RwLock<Inner>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable { inner: RwLock::new(Inner { order: Vec::new(), routes: HashMap::new() }) }
    }

    /// Replace a single service's route list atomically. Malformed
    /// patterns are rejected wholesale: the service's existing routes
    /// are left untouched rather than partially replaced.
    pub fn replace_service(&self, service: &str, patterns: &[String]) -> Result<()> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            compiled.push(Route { service: service.to_string(), pattern: compile(raw)? });
        }

        let mut inner = self.inner.write().expect("route table lock poisoned");
        if !inner.routes.contains_key(service) {
            inner.order.push(service.to_string());
        }
        inner.routes.insert(service.to_string(), Arc::new(compiled));
        Ok(())
    }

    /// First matching `(service, captures, literal pattern)` across
    /// services in insertion order, or `None`.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        let inner = self.inner.read().expect("route table lock poisoned");
        for service in &inner.order {
            let Some(routes) = inner.routes.get(service) else { continue };
            for route in routes.iter() {
                if let Some(captures) = route.pattern.matches(path) {
                    return Some(RouteMatch {
                        service: route.service.clone(),
                        captures,
                        literal_pattern: route.pattern.literal.clone(),
                    });
                }
            }
        }
        None
    }

    /// Known service names, in insertion order (the `ServiceNameSet`).
    pub fn services(&self) -> Vec<String> {
        let inner = self.inner.read().expect("route table lock poisoned");
        inner.order.clone()
    }

    pub fn has_service(&self, service: &str) -> bool {
        let inner = self.inner.read().expect("route table lock poisoned");
        inner.routes.contains_key(service)
    }

    /// The literal patterns currently registered for `service`, in
    /// replacement order, or an empty list for an unknown service.
    pub fn patterns(&self, service: &str) -> Vec<String> {
        let inner = self.inner.read().expect("route table lock poisoned");
        inner
            .routes
            .get(service)
            .map(|routes| routes.iter().map(|r| r.pattern.literal.clone()).collect())
            .unwrap_or_default()
    }

    /// Fallback matching applied only when `lookup` finds nothing (§4.2).
    /// Returns the attributed service and the (possibly rewritten)
    /// forwarded path.
    pub fn fallback(&self, path: &str, referer: Option<&str>) -> Option<(String, String)> {
        let services = self.services();

        if let Some(referer) = referer {
            for service in &services {
                let marker = format!("/{}", service);
                if referer.contains(&marker) {
                    return Some((service.clone(), path.to_string()));
                }
            }
        }

        let mut segments = path.splitn(2, '/');
        segments.next();
        let first = segments.next().unwrap_or("");
        let (first_segment, remainder) = match first.split_once('/') {
            Some((seg, rest)) => (seg, rest),
            None => (first, ""),
        };

        if services.iter().any(|s| s == first_segment) {
            let forwarded = if remainder.is_empty() { String::new() } else { format!("/{}", remainder) };
            return Some((first_segment.to_string(), forwarded));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_first_match_in_insertion_order() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        table.replace_service("billing", &["/v1/orders/:id".to_string()]).unwrap();

        let m = table.lookup("/v1/orders/42").unwrap();
        assert_eq!(m.service, "orders");
        assert_eq!(m.captures.get("id").unwrap(), "42");
    }

    #[test]
    fn lookup_none_when_no_service_matches() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        assert!(table.lookup("/v1/billing/1").is_none());
    }

    #[test]
    fn refresh_replaces_atomically_per_service() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        table.replace_service("orders", &["/v2/orders/:id".to_string()]).unwrap();

        assert!(table.lookup("/v1/orders/1").is_none());
        assert!(table.lookup("/v2/orders/1").is_some());
    }

    #[test]
    fn malformed_pattern_rejects_whole_replacement() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        let err = table.replace_service("orders", &["/v1/:".to_string()]);
        assert!(err.is_err());
        // existing routes untouched
        assert!(table.lookup("/v1/orders/1").is_some());
    }

    #[test]
    fn fallback_strips_known_service_prefix() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        let (service, forwarded) = table.fallback("/orders/static/app.js", None).unwrap();
        assert_eq!(service, "orders");
        assert_eq!(forwarded, "/static/app.js");
    }

    #[test]
    fn fallback_empty_remainder_is_empty_string() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        let (service, forwarded) = table.fallback("/orders", None).unwrap();
        assert_eq!(service, "orders");
        assert_eq!(forwarded, "");
    }

    #[test]
    fn patterns_lists_literal_patterns_for_service() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string(), "/v1/orders".to_string()]).unwrap();
        assert_eq!(table.patterns("orders"), vec!["/v1/orders/:id", "/v1/orders"]);
        assert!(table.patterns("billing").is_empty());
    }

    #[test]
    fn fallback_uses_referer_before_prefix() {
        let table = RouteTable::new();
        table.replace_service("orders", &["/v1/orders/:id".to_string()]).unwrap();
        let (service, forwarded) = table.fallback("/static/app.js", Some("https://host/orders/page")).unwrap();
        assert_eq!(service, "orders");
        assert_eq!(forwarded, "/static/app.js");
    }
}
