//! Rendering of cookie directives and the login flow-state cookie.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use gatehouse_access::{CookieDirective, FlowState};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::warn;

/// Flow-state cookie name (CSRF, PKCE and nonce during the OIDC handshake).
pub const AUTH_STATE_COOKIE: &str = "auth_state";

const AUTH_STATE_PATH: &str = "/auth";

/// Applies every directive to `jar`.
pub fn apply(jar: CookieJar, directives: &[CookieDirective]) -> CookieJar {
    directives
        .iter()
        .fold(jar, |jar, directive| jar.add(render(directive)))
}

/// Builds the `Set-Cookie` value for one directive.
pub fn render(directive: &CookieDirective) -> Cookie<'static> {
    let expires = OffsetDateTime::from_unix_timestamp(directive.expires.timestamp())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

    Cookie::build((directive.name.as_str(), directive.value.clone()))
        .path(directive.path.clone())
        .domain(directive.domain.clone())
        .expires(expires)
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

/// Stores the flow state until the provider calls back.
pub fn set_flow_state(jar: CookieJar, state: &FlowState) -> CookieJar {
    let value = match serde_json::to_string(state) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "failed to serialize flow state");
            return jar;
        }
    };

    // Lax so the cookie survives the cross-site redirect back from the provider.
    let cookie = Cookie::build((AUTH_STATE_COOKIE, value))
        .path(AUTH_STATE_PATH)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(10));

    jar.add(cookie)
}

/// Reads the flow state stored by [`set_flow_state`].
pub fn flow_state(jar: &CookieJar) -> Option<FlowState> {
    jar.get(AUTH_STATE_COOKIE)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
}

/// Removes the flow-state cookie.
pub fn clear_flow_state(jar: CookieJar) -> CookieJar {
    let removal = Cookie::build((AUTH_STATE_COOKIE, ""))
        .path(AUTH_STATE_PATH)
        .max_age(TimeDuration::ZERO);
    jar.add(removal)
}
