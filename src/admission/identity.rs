//! Per-caller rate-limit keys.
//!
//! An authenticated principal is keyed by user id, so its budget follows it
//! across networks and devices. Everyone else is keyed by caller class and
//! network address. Keys embed the request path: a caller's budget for one
//! endpoint is independent of its budget for another.

use super::rules::CallerClass;

/// User id sentinel treated the same as no user id at all.
const ANONYMOUS_USER: &str = "anonymous";

/// Derive the rate-limit key for a request.
pub fn identifier(
    path: &str,
    class: CallerClass,
    user_id: Option<&str>,
    remote_addr: &str,
) -> String {
    match user_id {
        Some(user) if user != ANONYMOUS_USER => format!("user:{}:{}", user, path),
        _ => format!("{}:{}:{}", class, remote_addr, path),
    }
}
