//! Core domain types for the gateway: route matching, the framed-message
//! codec, the message dispatch engine, the client directory, stats and
//! diagnostics. Transport-specific code (actix-web handlers, the
//! websocket connection type, CLI bootstrap) lives in the binary crates
//! that depend on this library.

pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod ids;
pub mod issue_log;
pub mod message;
pub mod pattern;
pub mod queue;
pub mod registry;
pub mod route_table;
pub mod router;
pub mod stats;

pub use error::{GatewayError, Result};
pub use gateway::{AdminSurface, Gateway, GatewayIdentity, SecurityPolicy};
pub use message::{parse_route, FramedMessage, RouteAddr};
pub use router::ClientDispatchOutcome;
