//! Framed-message model: parsing, route-address grammar, and HMAC
//! signing, per §6.1.
//!
//! The source system mixes long-form and short-form keys freely; rather
//! than fight two serde derives, parsing and serialization are done by
//! hand against `serde_json::Value`, reading either form on ingress and
//! always emitting the short form on egress. This mirrors the explicit,
//! non-macro-heavy style of the teacher's `client/payload.rs`.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;

use crate::error::{GatewayError, Result};
use crate::ids::gen_mid;

type HmacSha256 = Hmac<Sha256>;

/// A parsed `[<instance>@]<service>[:[<method>]<apiRoute>]` address, as
/// found in `to`, `from`, `via` and `forward` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAddr {
    pub instance: Option<String>,
    pub service: String,
    pub method: Option<String>,
    pub api_route: Option<String>,
}

impl RouteAddr {
    pub fn new(service: impl Into<String>) -> Self {
        RouteAddr { instance: None, service: service.into(), method: None, api_route: None }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(instance) = &self.instance {
            out.push_str(instance);
            out.push('@');
        }
        out.push_str(&self.service);
        if self.method.is_some() || self.api_route.is_some() {
            out.push(':');
            if let Some(method) = &self.method {
                out.push('[');
                out.push_str(method);
                out.push(']');
            }
            if let Some(api_route) = &self.api_route {
                out.push_str(api_route);
            }
        }
        out
    }
}

/// Parse a route-grammar string: `[<instance>@]<service>[:[<method>]<apiRoute>]`.
pub fn parse_route(raw: &str) -> Result<RouteAddr> {
    if raw.is_empty() {
        return Err(GatewayError::InvalidFrame("empty route address".into()));
    }

    let (instance_part, rest) = match raw.split_once('@') {
        Some((inst, rest)) => (Some(inst.to_string()), rest),
        None => (None, raw),
    };

    let (service, tail) = match rest.split_once(':') {
        Some((service, tail)) => (service.to_string(), Some(tail)),
        None => (rest.to_string(), None),
    };

    if service.is_empty() {
        return Err(GatewayError::InvalidFrame("route address missing service".into()));
    }

    let (method, api_route) = match tail {
        None => (None, None),
        Some(tail) => {
            if let Some(stripped) = tail.strip_prefix('[') {
                match stripped.split_once(']') {
                    Some((verb, path)) => {
                        let path = if path.is_empty() { None } else { Some(path.to_string()) };
                        (Some(verb.to_string()), path)
                    }
                    None => return Err(GatewayError::InvalidFrame("unterminated method tag".into())),
                }
            } else {
                (None, Some(tail.to_string()))
            }
        }
    };

    Ok(RouteAddr { instance: instance_part, service, method, api_route })
}

/// A framed message, decoded from either the long-form or short-form
/// field aliases and held canonically in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct FramedMessage {
    pub mid: String,
    pub to: String,
    pub from: String,
    pub body: Value,
    pub via: Option<String>,
    pub forward: Option<String>,
    pub rmid: Option<String>,
    pub msg_type: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<i64>,
    pub signature: Option<String>,
    pub authorization: Option<String>,
    pub headers: HashMap<String, String>,
}

fn field<'a>(obj: &'a Map<String, Value>, long: &str, short: &str) -> Option<&'a Value> {
    obj.get(long).or_else(|| obj.get(short))
}

fn field_str(obj: &Map<String, Value>, long: &str, short: &str) -> Option<String> {
    field(obj, long, short).and_then(|v| v.as_str()).map(|s| s.to_string())
}

impl FramedMessage {
    pub fn new(to: impl Into<String>, from: impl Into<String>, body: Value, tracer: &str) -> Self {
        FramedMessage {
            mid: gen_mid(tracer),
            to: to.into(),
            from: from.into(),
            body,
            via: None,
            forward: None,
            rmid: None,
            msg_type: None,
            version: None,
            timestamp: None,
            signature: None,
            authorization: None,
            headers: HashMap::new(),
        }
    }

    /// Parse a JSON object accepting either long-form or short-form keys.
    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| GatewayError::InvalidFrame("frame is not a JSON object".into()))?;

        let mid = field_str(obj, "mid", "mid")
            .ok_or_else(|| GatewayError::InvalidFrame("missing mid".into()))?;
        let to = field_str(obj, "to", "to")
            .ok_or_else(|| GatewayError::InvalidFrame("missing to".into()))?;
        let from = field_str(obj, "from", "frm")
            .ok_or_else(|| GatewayError::InvalidFrame("missing from".into()))?;
        let body = field(obj, "body", "bdy").cloned().unwrap_or(Value::Null);

        Ok(FramedMessage {
            mid,
            to,
            from,
            body,
            via: field_str(obj, "via", "via"),
            forward: field_str(obj, "forward", "forward"),
            rmid: field_str(obj, "rmid", "rmid"),
            msg_type: field_str(obj, "type", "typ"),
            version: field_str(obj, "version", "ver"),
            timestamp: field(obj, "timestamp", "ts").and_then(|v| v.as_i64()),
            signature: field_str(obj, "signature", "sig"),
            authorization: field_str(obj, "authorization", "authorization"),
            headers: field(obj, "headers", "headers")
                .and_then(|v| v.as_object())
                .map(|m| {
                    m.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Build the short-form JSON object emitted on egress, optionally
    /// including the signature field (callers sign first, then serialize).
    fn to_json(&self, include_signature: bool) -> Value {
        let mut map = Map::new();
        map.insert("mid".to_string(), Value::String(self.mid.clone()));
        map.insert("to".to_string(), Value::String(self.to.clone()));
        map.insert("frm".to_string(), Value::String(self.from.clone()));
        map.insert("bdy".to_string(), self.body.clone());
        if let Some(via) = &self.via {
            map.insert("via".to_string(), Value::String(via.clone()));
        }
        if let Some(forward) = &self.forward {
            map.insert("forward".to_string(), Value::String(forward.clone()));
        }
        if let Some(rmid) = &self.rmid {
            map.insert("rmid".to_string(), Value::String(rmid.clone()));
        }
        if let Some(typ) = &self.msg_type {
            map.insert("typ".to_string(), Value::String(typ.clone()));
        }
        if let Some(ver) = &self.version {
            map.insert("ver".to_string(), Value::String(ver.clone()));
        }
        if let Some(ts) = self.timestamp {
            map.insert("ts".to_string(), json!(ts));
        }
        if let Some(auth) = &self.authorization {
            map.insert("authorization".to_string(), Value::String(auth.clone()));
        }
        if !self.headers.is_empty() {
            map.insert("headers".to_string(), headers_to_value(&self.headers));
        }
        if include_signature {
            if let Some(sig) = &self.signature {
                map.insert("sig".to_string(), Value::String(sig.clone()));
            }
        }
        Value::Object(map)
    }

    /// Canonical short-form JSON, as emitted over the wire.
    pub fn to_short_json(&self) -> Value {
        self.to_json(true)
    }

    /// Long-form JSON, used where external callers (admin HTTP handlers,
    /// tests) expect the unabbreviated keys.
    pub fn to_long_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("mid".to_string(), Value::String(self.mid.clone()));
        map.insert("to".to_string(), Value::String(self.to.clone()));
        map.insert("from".to_string(), Value::String(self.from.clone()));
        map.insert("body".to_string(), self.body.clone());
        if let Some(via) = &self.via {
            map.insert("via".to_string(), Value::String(via.clone()));
        }
        if let Some(forward) = &self.forward {
            map.insert("forward".to_string(), Value::String(forward.clone()));
        }
        if let Some(rmid) = &self.rmid {
            map.insert("rmid".to_string(), Value::String(rmid.clone()));
        }
        if let Some(typ) = &self.msg_type {
            map.insert("type".to_string(), Value::String(typ.clone()));
        }
        if let Some(ver) = &self.version {
            map.insert("version".to_string(), Value::String(ver.clone()));
        }
        if let Some(ts) = self.timestamp {
            map.insert("timestamp".to_string(), json!(ts));
        }
        if let Some(sig) = &self.signature {
            map.insert("signature".to_string(), Value::String(sig.clone()));
        }
        if let Some(auth) = &self.authorization {
            map.insert("authorization".to_string(), Value::String(auth.clone()));
        }
        if !self.headers.is_empty() {
            map.insert("headers".to_string(), headers_to_value(&self.headers));
        }
        Value::Object(map)
    }

    /// The canonical form signed over: the short-form JSON with the
    /// signature field omitted, serialized with sorted keys so both
    /// sides compute the same bytes regardless of map iteration order.
    fn canonical_bytes(&self) -> Vec<u8> {
        let value = self.to_json(false);
        canonicalize(&value).into_bytes()
    }

    /// Sign this message in place with the shared secret, setting `signature`.
    pub fn sign(&mut self, secret: &str) {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(&self.canonical_bytes());
        let digest = mac.finalize().into_bytes();
        self.signature = Some(hex::encode(digest));
    }

    /// Verify this message's `signature` against the shared secret.
    pub fn verify(&self, secret: &str) -> bool {
        let Some(expected_hex) = &self.signature else { return false };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(&self.canonical_bytes());
        match hex::decode(expected_hex) {
            Ok(expected) => mac.verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }

    /// Build a reply framed message correlated via `rmid`, addressed back
    /// to the sender of this message.
    pub fn reply(&self, from: impl Into<String>, body: Value, tracer: &str) -> FramedMessage {
        let mut reply = FramedMessage::new(self.from.clone(), from, body, tracer);
        reply.rmid = Some(self.mid.clone());
        reply
    }
}

fn headers_to_value(headers: &HashMap<String, String>) -> Value {
    let mut map = Map::new();
    for (k, v) in headers {
        map.insert(k.clone(), Value::String(v.clone()));
    }
    Value::Object(map)
}

/// Deterministic JSON serialization with object keys sorted, so HMAC
/// input bytes don't depend on insertion order.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_service() {
        let addr = parse_route("orders").unwrap();
        assert_eq!(addr.service, "orders");
        assert!(addr.instance.is_none());
        assert!(addr.method.is_none());
    }

    #[test]
    fn parses_instance_method_and_path() {
        let addr = parse_route("inst1@orders:[get]/v1/list").unwrap();
        assert_eq!(addr.instance.as_deref(), Some("inst1"));
        assert_eq!(addr.service, "orders");
        assert_eq!(addr.method.as_deref(), Some("get"));
        assert_eq!(addr.api_route.as_deref(), Some("/v1/list"));
    }

    #[test]
    fn parses_path_without_method_tag() {
        let addr = parse_route("orders:/v1/list").unwrap();
        assert!(addr.method.is_none());
        assert_eq!(addr.api_route.as_deref(), Some("/v1/list"));
    }

    #[test]
    fn rejects_empty_service() {
        assert!(parse_route("inst1@:/x").is_err());
    }

    #[test]
    fn accepts_both_long_and_short_form_keys() {
        let long = json!({
            "mid": "m1", "to": "orders", "from": "gw1@router:/",
            "body": {"a": 1}, "type": "ping", "version": "1", "timestamp": 5
        });
        let short = json!({
            "mid": "m1", "to": "orders", "frm": "gw1@router:/",
            "bdy": {"a": 1}, "typ": "ping", "ver": "1", "ts": 5
        });
        let a = FramedMessage::from_value(long).unwrap();
        let b = FramedMessage::from_value(short).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn egress_is_always_short_form() {
        let msg = FramedMessage::new("orders", "gw1@router:/", json!({"x": 1}), "tr1");
        let out = msg.to_short_json();
        let obj = out.as_object().unwrap();
        assert!(obj.contains_key("frm"));
        assert!(obj.contains_key("bdy"));
        assert!(!obj.contains_key("from"));
        assert!(!obj.contains_key("body"));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let mut msg = FramedMessage::new("orders", "gw1@router:/", json!({"x": 1}), "tr1");
        msg.sign("sekret");
        assert!(msg.verify("sekret"));
        assert!(!msg.verify("wrong-secret"));
    }

    #[test]
    fn verify_fails_without_signature() {
        let msg = FramedMessage::new("orders", "gw1@router:/", json!({"x": 1}), "tr1");
        assert!(!msg.verify("sekret"));
    }

    #[test]
    fn headers_round_trip_through_short_form_json() {
        let mut msg = FramedMessage::new("orders", "gw1@router:/", json!({}), "tr1");
        msg.headers.insert("x-hydra-tracer".to_string(), "tr1".to_string());
        let wire = msg.to_short_json();
        let parsed = FramedMessage::from_value(wire).unwrap();
        assert_eq!(parsed.headers.get("x-hydra-tracer"), Some(&"tr1".to_string()));
    }

    #[test]
    fn empty_headers_are_omitted_from_egress() {
        let msg = FramedMessage::new("orders", "gw1@router:/", json!({}), "tr1");
        let obj = msg.to_short_json();
        assert!(!obj.as_object().unwrap().contains_key("headers"));
    }

    #[test]
    fn reply_carries_rmid_and_swaps_direction() {
        let msg = FramedMessage::new("orders", "gw1@router:/", json!({}), "tr1");
        let reply = msg.reply("orders@router:/", json!({"ok": true}), "tr2");
        assert_eq!(reply.to, msg.from);
        assert_eq!(reply.rmid.as_deref(), Some(msg.mid.as_str()));
    }
}
