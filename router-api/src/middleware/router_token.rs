//! Authorization guard for the gateway's own admin routes (§4.8).
//!
//! Shaped after the teacher's `JwtAuth`/`RoleAuth` `Transform`/`Service`
//! pair in `api/users/helper/auth_middleware.rs`, but the policy here is
//! config-driven rather than JWT-based: admin routes are hidden behind a
//! 404 (not a 401) so an unauthorized caller can't distinguish "wrong
//! token" from "route doesn't exist". Per §4.8/§6.5, the configured
//! token is required to be a UUIDv4; a non-UUID configured token never
//! authorizes a caller, the same as a missing one.

use std::future::{ready, Ready};
use std::rc::Rc;

use actix_web::dev::{self, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::error::ErrorNotFound;
use actix_web::Error;
use futures_util::future::LocalBoxFuture;
use router_core::config::Router as ConfigKey;
use uuid::Uuid;

const STATIC_ASSET_SUFFIXES: &[&str] = &[".css", ".js", ".ttf", ".woff", ".woff2"];

pub struct RouterTokenAuth;

impl RouterTokenAuth {
    pub fn new() -> Self {
        RouterTokenAuth
    }
}

impl Default for RouterTokenAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static, B> Transform<S, ServiceRequest> for RouterTokenAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RouterTokenAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RouterTokenAuthMiddleware { service: Rc::new(service) }))
    }
}

pub struct RouterTokenAuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RouterTokenAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();

        let path = req.path().to_string();
        let is_static_asset = STATIC_ASSET_SUFFIXES.iter().any(|suffix| path.ends_with(suffix));

        let disabled = ConfigKey::DisableRouterEndpoint.xget::<bool>();
        if disabled && !is_static_asset {
            return Box::pin(async move { Err(ErrorNotFound("not found")) });
        }

        let configured_token = ConfigKey::RouterToken.get::<String>();
        let token_is_valid_uuid =
            Uuid::parse_str(&configured_token).map(|u| u.get_version() == Some(uuid::Version::Random)).unwrap_or(false);
        if !configured_token.is_empty() && !is_static_asset {
            let is_localhost = req
                .connection_info()
                .realip_remote_addr()
                .map(|addr| addr == "127.0.0.1" || addr == "::1")
                .unwrap_or(false);

            if !is_localhost {
                let supplied = req
                    .query_string()
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("token="))
                    .unwrap_or("");

                if !token_is_valid_uuid || supplied != configured_token {
                    return Box::pin(async move { Err(ErrorNotFound("not found")) });
                }
            }
        }

        Box::pin(async move { srv.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_static_asset_suffixes() {
        assert!(STATIC_ASSET_SUFFIXES.iter().any(|s| "/index.css".ends_with(s)));
        assert!(STATIC_ASSET_SUFFIXES.iter().any(|s| "/fonts/a.woff2".ends_with(s)));
        assert!(!STATIC_ASSET_SUFFIXES.iter().any(|s| "/v1/router/stats".ends_with(s)));
    }

    fn is_valid_router_token(token: &str) -> bool {
        Uuid::parse_str(token).map(|u| u.get_version() == Some(uuid::Version::Random)).unwrap_or(false)
    }

    #[test]
    fn only_uuidv4_configured_tokens_are_valid() {
        assert!(is_valid_router_token("9d2c9d1a-9b2e-4f1e-8f0a-0c1b2a3d4e5f"));
        assert!(!is_valid_router_token("not-a-uuid"));
        assert!(!is_valid_router_token(""));
        // well-formed but not v4 (nil UUID, and a v1 time-based UUID) must not authorize.
        assert!(!is_valid_router_token("00000000-0000-0000-0000-000000000000"));
        assert!(!is_valid_router_token("2ed6657d-e927-11ed-a05b-0242ac120003"));
    }
}
