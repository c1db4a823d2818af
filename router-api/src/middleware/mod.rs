pub mod router_token;
