//! Server routes used by the client

use crate::PostId;

pub const LOGIN: &str = "/api/auth/login";
pub const LOGOUT: &str = "/api/auth/logout";
pub const REFRESH: &str = "/api/auth/refresh";
pub const WHOAMI: &str = "/api/auth/me";

pub const FEED: &str = "/ws/feed";

/// Routes that must never start a session refresh when they answer 401
///
/// A 401 on the refresh route itself would recurse, login and logout are
/// expected to run without a session, and the identity check is how the
/// client finds out whether there is a session at all.
pub const REFRESH_EXEMPT: [&str; 4] = [REFRESH, LOGIN, LOGOUT, WHOAMI];

pub fn is_refresh_exempt(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = match path.len() > 1 {
        true => path.trim_end_matches('/'),
        false => path,
    };
    REFRESH_EXEMPT.contains(&path)
}

pub fn comments(post: &PostId) -> String {
    format!("/api/posts/{}/comments", post.0)
}

pub fn like(post: &PostId) -> String {
    format!("/api/posts/{}/like", post.0)
}
