//! Authentication extractor for Axum.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use gatehouse_access::{AuthDecision, AuthenticatedSession, CookieName, RequestContext};
use std::sync::Arc;

use crate::{AppState, cookies, error::AuthFailure};

/// Extractor for requiring an authenticated session.
///
/// A valid `auth` cookie is rotated, so handlers must return `jar` with their
/// response to send the new expiry. Without a valid cookie the request is
/// redirected to the identity provider, or rejected when auto-redirect is off.
pub struct RequireAuth {
    pub session: AuthenticatedSession,
    pub jar: CookieJar,
}

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let Ok(jar) = CookieJar::from_request_parts(parts, state).await;

        let request = RequestContext::new(
            jar.get(CookieName::Auth.as_str())
                .map(|cookie| cookie.value().to_string()),
        );
        let outcome = app_state.authenticator.authenticate(&request).await;
        let jar = cookies::apply(jar, &outcome.cookies);

        match outcome.decision {
            AuthDecision::Authenticated(session) => Ok(RequireAuth { session, jar }),
            AuthDecision::Redirect(redirect) => Err(AuthRejection::Redirect {
                jar: cookies::set_flow_state(jar, &redirect.state),
                location: redirect.authorization_url,
            }),
            AuthDecision::Failed(error) => Err(AuthRejection::Failed(AuthFailure { jar, error })),
        }
    }
}

/// Rejection type for [`RequireAuth`].
pub enum AuthRejection {
    /// Send the browser to the identity provider.
    Redirect { jar: CookieJar, location: String },
    Failed(AuthFailure),
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect { jar, location } => (jar, Redirect::to(&location)).into_response(),
            Self::Failed(failure) => failure.into_response(),
        }
    }
}
