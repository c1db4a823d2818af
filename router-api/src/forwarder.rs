//! HTTPForwarder: per-request forwarding pipeline (§4.3).
//!
//! Shaped like the teacher's `module/httpc.rs` request/response handling,
//! but talking JSON framed envelopes to the registry's `makeAPIRequest`
//! instead of raw TCP bytes to a literal backend address.

use std::collections::HashMap;
use std::io::Read;

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{web, HttpRequest, HttpResponse};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::io::Write;

use router_core::config::Router as ConfigKey;
use router_core::gateway::Gateway;
use router_core::ids::gen_tracer;
use router_core::message::FramedMessage;

const STRIPPED_REQUEST_HEADERS: &[&str] = &["accept-encoding", "content-encoding"];

/// Forward one HTTP request to `service` at `forwarded_path`, after a
/// successful (or fallback) RouteTable match.
pub async fn forward(
    gateway: &Gateway,
    req: &HttpRequest,
    service: &str,
    forwarded_path: &str,
    body: web::Bytes,
) -> HttpResponse {
    if req.method() == actix_web::http::Method::OPTIONS {
        return options_response();
    }

    let tracer = gen_tracer();
    let method = req.method().as_str().to_lowercase();

    let raw_body = decode_content_encoding(req, &body, gateway);

    let mut headers = HashMap::new();
    let mut authorization = None;
    for (name, value) in req.headers().iter() {
        let name_lower = name.as_str().to_lowercase();
        if STRIPPED_REQUEST_HEADERS.contains(&name_lower.as_str()) {
            continue;
        }
        let Ok(value_str) = value.to_str() else { continue };
        if name_lower == "authorization" {
            authorization = Some(value_str.to_string());
            continue;
        }
        headers.insert(name_lower, value_str.to_string());
    }
    headers.insert("x-hydra-tracer".to_string(), tracer.clone());

    let body_value = decode_request_body(req, &raw_body);

    let to = format!("{}:[{}]{}", service, method, forwarded_path);
    let from = format!("{}@{}:/", gateway.identity.instance, gateway.identity.service);
    let mut envelope = FramedMessage::new(to, from, body_value, &tracer);
    envelope.authorization = authorization;
    envelope.headers = headers;

    let timeout = std::time::Duration::from_secs(ConfigKey::RequestTimeout.xget::<u64>());
    gateway.http_stats.log(service);

    match gateway.registry.make_api_request(&envelope, timeout).await {
        Ok(resp) => {
            if resp.status > 201 {
                gateway.error_stats.log(service);
            }
            if resp.status >= 500 {
                gateway.issue_log.fatal(format!("upstream '{service}' returned {}", resp.status));
            } else if resp.status >= 400 {
                gateway.issue_log.error(format!("upstream '{service}' returned {}", resp.status));
            }
            render_upstream_response(req, resp, &tracer)
        }
        Err(e) => {
            gateway.error_stats.log(service);
            gateway.issue_log.fatal(format!("forward to '{service}' failed: {e}"));
            let status = actix_web::http::StatusCode::from_u16(e.status_code() as u16)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).json(json!({"result": {"reason": e.to_string()}}))
        }
    }
}

fn options_response() -> HttpResponse {
    let mut builder = HttpResponse::NoContent();
    apply_cors_headers(&mut builder);
    builder.finish()
}

fn apply_cors_headers(builder: &mut actix_web::HttpResponseBuilder) {
    let cors = ConfigKey::Cors.xget::<HashMap<String, String>>();
    for (key, value) in cors {
        if let (Ok(name), Ok(val)) = (HeaderName::try_from(key.as_str()), HeaderValue::from_str(&value)) {
            builder.insert_header((name, val));
        }
    }
}

fn decode_content_encoding(req: &HttpRequest, body: &web::Bytes, gateway: &Gateway) -> Vec<u8> {
    let is_gzip = req
        .headers()
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        return body.to_vec();
    }

    let mut decoder = GzDecoder::new(&body[..]);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(e) => {
            gateway.issue_log.error(format!("gzip inflate failed: {e}"));
            Vec::new()
        }
    }
}

fn decode_request_body(req: &HttpRequest, raw: &[u8]) -> Value {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    if content_type.contains("application/json") {
        serde_json::from_slice(raw).unwrap_or(Value::Null)
    } else if content_type.contains("application/x-www-form-urlencoded") {
        let text = String::from_utf8_lossy(raw);
        let mut map = serde_json::Map::new();
        for pair in text.split('&').filter(|p| !p.is_empty()) {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            map.insert(urldecode(key), Value::String(urldecode(value)));
        }
        Value::Object(map)
    } else if raw.is_empty() {
        Value::Null
    } else {
        Value::String(String::from_utf8_lossy(raw).to_string())
    }
}

fn urldecode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

fn render_upstream_response(req: &HttpRequest, resp: router_core::registry::UpstreamResponse, tracer: &str) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(resp.status).unwrap_or(actix_web::http::StatusCode::OK);
    let client_accepts_gzip = req
        .headers()
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);

    if resp.headers.is_none() {
        let mut builder = HttpResponse::build(status);
        apply_cors_headers(&mut builder);
        builder.insert_header(("x-hydra-tracer", tracer));
        let body: Value = serde_json::from_slice(&resp.body).unwrap_or_else(|_| json!({"result": Value::Null}));
        return builder.json(body);
    }

    let mut builder = HttpResponse::build(status);
    apply_cors_headers(&mut builder);
    builder.insert_header(("x-hydra-tracer", tracer));
    if let Some(headers) = &resp.headers {
        for (key, value) in headers {
            if let (Ok(name), Ok(val)) = (HeaderName::try_from(key.as_str()), HeaderValue::from_str(value)) {
                builder.insert_header((name, val));
            }
        }
    }

    if resp.is_json() {
        if let Ok(mut value) = serde_json::from_slice::<Value>(&resp.body) {
            if let Some(obj) = value.as_object_mut() {
                obj.remove("rawPayload");
            }
            let bytes = serde_json::to_vec(&value).unwrap_or_default();
            if client_accepts_gzip {
                if let Ok(compressed) = gzip_compress(&bytes) {
                    builder.insert_header(("content-encoding", "gzip"));
                    return builder.content_type("application/json").body(compressed);
                }
            }
            return builder.content_type("application/json").body(bytes);
        }
    }

    builder.body(resp.body)
}

fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urldecode_handles_plus_and_percent_escapes() {
        assert_eq!(urldecode("a+b%20c"), "a b c");
        assert_eq!(urldecode("100%25"), "100%");
    }
}
