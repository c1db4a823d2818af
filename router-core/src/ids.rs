//! Short opaque identifier generation.
//!
//! Grounded in the teacher's `router-api/src/api/users/helper/auth_token.rs`,
//! which samples `rand::distributions::Alphanumeric` to mint a random
//! secret on first access. The same distribution is reused here, but the
//! charset is restricted to exclude `-` deliberately: client-ids and
//! instance-ids are spliced into `via` tags as `<instance>-<clientId>`,
//! and a dash-free charset keeps that split on the first `-` unambiguous.

use rand::Rng;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random dash-free alphanumeric id of the given length.
pub fn gen_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Client-ids and instance-ids are 12 characters, long enough to make
/// collisions unlikely within a single cluster's lifetime.
pub fn gen_client_id() -> String {
    gen_id(12)
}

pub fn gen_instance_id() -> String {
    gen_id(12)
}

/// Short tracer id attached to every forwarded HTTP request.
pub fn gen_tracer() -> String {
    gen_id(8)
}

/// Message id: a generated id suffixed with the tracer that produced it,
/// per §4.3 step 4 (`mid = <new id>-<tracer>`).
pub fn gen_mid(tracer: &str) -> String {
    format!("{}-{}", gen_id(12), tracer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_dash_free() {
        for _ in 0..50 {
            assert!(!gen_client_id().contains('-'));
            assert!(!gen_instance_id().contains('-'));
        }
    }

    #[test]
    fn ids_have_requested_length() {
        assert_eq!(gen_id(20).len(), 20);
        assert_eq!(gen_client_id().len(), 12);
    }
}
