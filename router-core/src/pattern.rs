//! Parameterized URL pattern compilation and matching (§4.1).
//!
//! Patterns are segment-based: `/v1/offers/validate/:phone/:code` compiles
//! to a sequence of literal and capture segments. Matching is
//! case-sensitive, ignores query strings, and requires an exact segment
//! count (no wildcard/catch-all segments in this grammar).

use std::collections::HashMap;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A compiled pattern: the method tag (if any) that was stripped from the
/// source string, and the literal pattern stored in the RouteTable.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub method: Option<String>,
    pub literal: String,
    segments: Vec<Segment>,
}

/// Result of a successful match: named captures from `:param` segments.
pub type Captures = HashMap<String, String>;

/// Strip a leading `[verb]` method tag from a raw pattern string, if present.
pub fn strip_method_tag(raw: &str) -> (Option<String>, &str) {
    if let Some(stripped) = raw.strip_prefix('[') {
        if let Some((verb, rest)) = stripped.split_once(']') {
            return (Some(verb.to_lowercase()), rest);
        }
    }
    (None, raw)
}

/// Compile a pattern string (with an optional leading method tag) into a matcher.
pub fn compile(raw: &str) -> Result<CompiledPattern> {
    let (method, literal) = strip_method_tag(raw);
    if literal.is_empty() {
        return Err(GatewayError::InvalidFrame(format!("malformed pattern '{}'", raw)));
    }

    let mut segments = Vec::new();
    for part in literal.split('/') {
        if part.is_empty() {
            continue;
        }
        if let Some(name) = part.strip_prefix(':') {
            if name.is_empty() {
                return Err(GatewayError::InvalidFrame(format!("malformed pattern '{}'", raw)));
            }
            segments.push(Segment::Capture(name.to_string()));
        } else {
            segments.push(Segment::Literal(part.to_string()));
        }
    }

    Ok(CompiledPattern { method, literal: literal.to_string(), segments })
}

impl CompiledPattern {
    /// Match a concrete path (query string, if any, is ignored).
    pub fn matches(&self, path: &str) -> Option<Captures> {
        let path = path.split('?').next().unwrap_or(path);
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captures = Captures::new();
        for (segment, actual) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != actual {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    captures.insert(name.clone(), actual.to_string());
                }
            }
        }
        Some(captures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_method_tag() {
        let (method, rest) = strip_method_tag("[get]/v1/list");
        assert_eq!(method.as_deref(), Some("get"));
        assert_eq!(rest, "/v1/list");
    }

    #[test]
    fn compiles_without_method_tag() {
        let p = compile("/v1/list/:thing").unwrap();
        assert!(p.method.is_none());
        assert_eq!(p.literal, "/v1/list/:thing");
    }

    #[test]
    fn matches_literal_and_captures() {
        let p = compile("/v1/offers/validate/:phone/:code").unwrap();
        let captures = p.matches("/v1/offers/validate/0812345/abcd").unwrap();
        assert_eq!(captures.get("phone").unwrap(), "0812345");
        assert_eq!(captures.get("code").unwrap(), "abcd");
    }

    #[test]
    fn rejects_mismatched_segment_count() {
        let p = compile("/v1/offers/validate/:phone/:code").unwrap();
        assert!(p.matches("/v1/offers/validate/0812345").is_none());
    }

    #[test]
    fn ignores_query_string() {
        let p = compile("/v1/list/:thing").unwrap();
        let captures = p.matches("/v1/list/routes?x=1").unwrap();
        assert_eq!(captures.get("thing").unwrap(), "routes");
    }

    #[test]
    fn is_case_sensitive() {
        let p = compile("/V1/List").unwrap();
        assert!(p.matches("/v1/list").is_none());
        assert!(p.matches("/V1/List").is_some());
    }

    #[test]
    fn rejects_malformed_capture() {
        assert!(compile("/v1/:").is_err());
    }
}
