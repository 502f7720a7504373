//! services/api/src/web/middleware.rs
//!
//! Resolves the caller's identity for the ledger.

use axum::{extract::Request, middleware::Next, response::Response};
use rewards_core::StaticAuth;
use tracing::debug;

/// Header set by the upstream auth provider with the authenticated uid.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that reads the uid header and inserts a `StaticAuth` into the
/// request extensions.
///
/// A missing or blank header is not rejected here: the request runs signed out
/// and the ledger skips the operation.
pub async fn resolve_user(mut req: Request, next: Next) -> Response {
    let user = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string);

    let auth = match user {
        Some(uid) => StaticAuth::signed_in(uid),
        None => {
            debug!(path = %req.uri().path(), "Request without a signed-in user");
            StaticAuth::signed_out()
        }
    };
    req.extensions_mut().insert(auth);
    next.run(req).await
}
