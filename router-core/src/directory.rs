//! WSClientRegistry: local table of active client connections, plus the
//! replicated directory of which gateway replica owns which client-id
//! (§3 Data Model, §4.5).
//!
//! `ClientSink` is the non-owning handle the teacher's design notes (§9)
//! call for: `router-api`'s actix-ws connection implements it, and
//! `router-core` never references actix-ws directly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::Result;
use crate::message::FramedMessage;

/// A non-owning handle to one persistent client connection.
#[async_trait]
pub trait ClientSink: Send + Sync {
    async fn send(&self, msg: &FramedMessage) -> Result<()>;
    fn remote_ip(&self) -> String;
}

/// Local table of this replica's live connections, plus the gossiped
/// directory of every other replica's connections.
pub struct WsClientRegistry {
    self_router_id: String,
    local: RwLock<HashMap<String, Arc<dyn ClientSink>>>,
    global: RwLock<HashMap<String, HashSet<String>>>,
}

impl WsClientRegistry {
    pub fn new(self_router_id: impl Into<String>) -> Self {
        WsClientRegistry {
            self_router_id: self_router_id.into(),
            local: RwLock::new(HashMap::new()),
            global: RwLock::new(HashMap::new()),
        }
    }

    pub fn self_router_id(&self) -> &str {
        &self.self_router_id
    }

    /// Bind a client-id to a connection handle on this replica.
    pub fn open(&self, client_id: &str, sink: Arc<dyn ClientSink>) {
        self.local.write().expect("directory lock poisoned").insert(client_id.to_string(), sink);
        self.mark_present(&self.self_router_id.clone(), client_id);
    }

    /// Remove a connection on close; returns whether it was present.
    pub fn close(&self, client_id: &str) -> bool {
        let existed = self.local.write().expect("directory lock poisoned").remove(client_id).is_some();
        self.remove_from_router(&self.self_router_id.clone(), client_id);
        existed
    }

    /// Rebind an existing connection to a new client-id (reconnect handshake).
    pub fn rebind(&self, old_id: &str, new_id: &str) -> Option<Arc<dyn ClientSink>> {
        let sink = self.local.write().expect("directory lock poisoned").remove(old_id)?;
        self.local.write().expect("directory lock poisoned").insert(new_id.to_string(), sink.clone());
        self.remove_from_router(&self.self_router_id.clone(), old_id);
        self.mark_present(&self.self_router_id.clone(), new_id);
        Some(sink)
    }

    pub fn get_local(&self, client_id: &str) -> Option<Arc<dyn ClientSink>> {
        self.local.read().expect("directory lock poisoned").get(client_id).cloned()
    }

    pub fn is_local(&self, client_id: &str) -> bool {
        self.local.read().expect("directory lock poisoned").contains_key(client_id)
    }

    pub fn local_ids(&self) -> Vec<String> {
        self.local.read().expect("directory lock poisoned").keys().cloned().collect()
    }

    pub fn local_snapshot(&self) -> HashSet<String> {
        self.local.read().expect("directory lock poisoned").keys().cloned().collect()
    }

    pub fn mark_present(&self, router_id: &str, client_id: &str) {
        self.global
            .write()
            .expect("directory lock poisoned")
            .entry(router_id.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    pub fn remove_from_router(&self, router_id: &str, client_id: &str) {
        if let Some(set) = self.global.write().expect("directory lock poisoned").get_mut(router_id) {
            set.remove(client_id);
        }
    }

    pub fn remove_router(&self, router_id: &str) {
        self.global.write().expect("directory lock poisoned").remove(router_id);
    }

    pub fn adopt_router_set(&self, router_id: &str, ids: HashSet<String>) {
        self.global.write().expect("directory lock poisoned").insert(router_id.to_string(), ids);
    }

    /// Search the GlobalDirectory for `client_id`, returning the owning
    /// router id if known (`wsdir.loc`).
    pub fn locate(&self, client_id: &str) -> Option<String> {
        let global = self.global.read().expect("directory lock poisoned");
        global.iter().find(|(_, ids)| ids.contains(client_id)).map(|(router, _)| router.clone())
    }

    pub fn global_snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.global.read().expect("directory lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSink;

    #[async_trait]
    impl ClientSink for FakeSink {
        async fn send(&self, _msg: &FramedMessage) -> Result<()> {
            Ok(())
        }
        fn remote_ip(&self) -> String {
            "127.0.0.1".to_string()
        }
    }

    #[test]
    fn open_registers_both_local_and_self_in_global() {
        let dir = WsClientRegistry::new("router-1");
        dir.open("client-a", Arc::new(FakeSink));
        assert!(dir.is_local("client-a"));
        assert_eq!(dir.locate("client-a").as_deref(), Some("router-1"));
    }

    #[test]
    fn close_removes_from_both_tables() {
        let dir = WsClientRegistry::new("router-1");
        dir.open("client-a", Arc::new(FakeSink));
        assert!(dir.close("client-a"));
        assert!(!dir.is_local("client-a"));
        assert!(dir.locate("client-a").is_none());
    }

    #[test]
    fn rebind_moves_connection_to_new_id() {
        let dir = WsClientRegistry::new("router-1");
        dir.open("old-id", Arc::new(FakeSink));
        dir.rebind("old-id", "new-id");
        assert!(!dir.is_local("old-id"));
        assert!(dir.is_local("new-id"));
        assert_eq!(dir.locate("new-id").as_deref(), Some("router-1"));
    }

    #[test]
    fn adopt_router_set_then_locate_finds_remote_client() {
        let dir = WsClientRegistry::new("router-1");
        let mut remote = HashSet::new();
        remote.insert("client-b".to_string());
        dir.adopt_router_set("router-2", remote);
        assert_eq!(dir.locate("client-b").as_deref(), Some("router-2"));
    }

    #[test]
    fn remove_router_drops_entire_set() {
        let dir = WsClientRegistry::new("router-1");
        let mut remote = HashSet::new();
        remote.insert("client-b".to_string());
        dir.adopt_router_set("router-2", remote);
        dir.remove_router("router-2");
        assert!(dir.locate("client-b").is_none());
    }
}
