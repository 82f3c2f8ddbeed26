//! HTTP routes for login, callback, silent renewal, and the protected area.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use gatehouse_access::{
    AuthDecision, AuthOutcome, AuthenticatedSession, AuthenticationError, CallbackParams,
    CookieName, User,
};
use serde::Serialize;
use std::sync::Arc;

use crate::{AppState, cookies, error::AuthFailure, middleware::RequireAuth};

/// The local user record.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub uuid: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id().get(),
            uuid: user.uuid().to_string(),
            username: user.username().map(str::to_string),
            email: user.email().map(str::to_string),
            role: user.role().to_string(),
        }
    }
}

/// A renewed session.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: i64,
    pub valid_till: DateTime<Utc>,
}

/// Returns the authenticated user's record.
pub async fn me(State(state): State<Arc<AppState>>, auth: RequireAuth) -> Response {
    let RequireAuth { session, jar } = auth;
    match state.store.find_user_by_id(session.user_id()).await {
        Ok(Some(user)) => (jar, Json(UserResponse::from(user))).into_response(),
        Ok(None) => AuthFailure {
            jar: cookies::apply(
                jar,
                &[state
                    .authenticator
                    .cookie_policy()
                    .clear(CookieName::Auth, Utc::now())],
            ),
            error: AuthenticationError::InvalidCredential {
                reason: format!("user {} no longer exists", session.user_id()),
            },
        }
        .into_response(),
        Err(report) => AuthFailure {
            jar,
            error: AuthenticationError::Persistence {
                details: report.to_string(),
            },
        }
        .into_response(),
    }
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
pub async fn login(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let outcome = state.authenticator.begin_login();
    respond(jar, outcome, |jar, _| (jar, Redirect::to("/")).into_response())
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Response {
    let Some(flow) = cookies::flow_state(&jar) else {
        return (StatusCode::BAD_REQUEST, "Missing auth state").into_response();
    };

    let outcome = state.authenticator.complete_login(&params, &flow).await;
    let jar = cookies::clear_flow_state(jar);
    let destination = state.session_config.post_login_redirect.as_str();
    respond(jar, outcome, |jar, _| {
        (jar, Redirect::to(destination)).into_response()
    })
}

/// Renews the session silently with the `refresh` cookie.
pub async fn refresh(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let refresh_token = jar
        .get(CookieName::Refresh.as_str())
        .map(|cookie| cookie.value().to_string())
        .unwrap_or_default();

    let outcome = state
        .authenticator
        .authenticate_with_refresh_token(&refresh_token)
        .await;
    respond(jar, outcome, |jar, session| {
        let body = SessionResponse {
            user_id: session.user_id().get(),
            valid_till: session.token.valid_till(),
        };
        (jar, Json(body)).into_response()
    })
}

/// Liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}

fn respond<F>(jar: CookieJar, outcome: AuthOutcome, on_success: F) -> Response
where
    F: FnOnce(CookieJar, AuthenticatedSession) -> Response,
{
    let jar = cookies::apply(jar, &outcome.cookies);
    match outcome.decision {
        AuthDecision::Authenticated(session) => on_success(jar, session),
        AuthDecision::Redirect(redirect) => (
            cookies::set_flow_state(jar, &redirect.state),
            Redirect::to(&redirect.authorization_url),
        )
            .into_response(),
        AuthDecision::Failed(error) => AuthFailure { jar, error }.into_response(),
    }
}
