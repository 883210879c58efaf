// SPDX-License-Identifier: Apache-2.0

use axum::http::header::{HeaderMap, HeaderValue, COOKIE};
use rand::RngCore;

pub const SESSION_COOKIE: &str = "_track";
pub const SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// An issued or re-read viewer session. When `set_cookie` is present the
/// session was minted on this request and the header must be attached to the
/// response.
pub struct Session {
    pub id: String,
    pub set_cookie: Option<HeaderValue>,
}

#[must_use]
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(COOKIE) {
        let raw = value.to_str().ok()?;
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(id) = pair.strip_prefix("_track=") {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

/// Read the `_track` cookie or mint a fresh session. The cookie is HttpOnly,
/// lax, path-root, and Secure only when the request arrived over TLS.
#[must_use]
pub fn get_or_create_session(headers: &HeaderMap, secure: bool) -> Session {
    if let Some(id) = session_from_headers(headers) {
        return Session {
            id,
            set_cookie: None,
        };
    }
    let id = generate_session_id();
    let cookie = format!(
        "{SESSION_COOKIE}={id}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; HttpOnly; SameSite=Lax{}",
        if secure { "; Secure" } else { "" }
    );
    let set_cookie = HeaderValue::from_str(&cookie).ok();
    Session { id, set_cookie }
}
