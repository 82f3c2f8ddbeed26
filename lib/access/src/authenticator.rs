//! The Authenticator: orchestrates cookie re-validation and federated login.
//!
//! Per request the authenticator moves through
//! `Unauthenticated → CookieValidating → FederationPending → Authenticated | Failed`.
//! `FederationPending` suspends across the provider redirect and is resumed
//! by [`Authenticator::complete_login`] when the callback arrives.
//!
//! The authenticator is the only component that knows about cookies, and even
//! it only returns [`CookieDirective`]s; rendering them is the caller's job.
//! No `Set` directive is emitted unless the store write behind it succeeded,
//! and a cookie that is known to reference an invalid credential is always
//! cleared before a failure is returned.

use crate::auth::{CallbackParams, FederatedLogin, FlowState, LoginRedirect};
use crate::cookie::{CookieDirective, CookieName, CookiePolicy};
use crate::error::AuthenticationError;
use crate::federation::{FederationClient, FederationOutcome};
use crate::reconcile::UserReconciler;
use crate::session::{SessionToken, TokenValidation};
use crate::store::CredentialStore;
use crate::tokens::{DEFAULT_SESSION_WINDOW_MINUTES, TokenLifecycle};
use crate::user::User;
use chrono::Duration;
use gatehouse_core::{Clock, SessionTokenId, UserId};
use rootcause::prelude::Report;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Per-request authentication states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CookieValidating,
    FederationPending,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::CookieValidating => "cookie_validating",
            Self::FederationPending => "federation_pending",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    SessionCookie,
    Federation,
    RefreshToken,
}

/// Session settings shared by every request.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    window: Duration,
    auto_redirect: bool,
    cookies: CookiePolicy,
}

impl SessionPolicy {
    /// A 30 minute sliding window with auto-redirect enabled.
    #[must_use]
    pub fn new(cookies: CookiePolicy) -> Self {
        Self {
            window: Duration::minutes(DEFAULT_SESSION_WINDOW_MINUTES),
            auto_redirect: true,
            cookies,
        }
    }

    /// Sets the sliding expiration window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets whether unauthenticated requests are sent to the provider.
    #[must_use]
    pub fn with_auto_redirect(mut self, auto_redirect: bool) -> Self {
        self.auto_redirect = auto_redirect;
        self
    }

    /// Returns the cookie policy.
    #[must_use]
    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }
}

/// What the caller knows about the inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    session_cookie: Option<String>,
    auto_redirect: Option<bool>,
}

impl RequestContext {
    /// Creates a context from the inbound `auth` cookie value, if any.
    #[must_use]
    pub fn new(session_cookie: Option<String>) -> Self {
        Self {
            session_cookie,
            auto_redirect: None,
        }
    }

    /// Overrides the policy's auto-redirect setting for this request.
    #[must_use]
    pub fn with_auto_redirect(mut self, auto_redirect: bool) -> Self {
        self.auto_redirect = Some(auto_redirect);
        self
    }

    fn session_token(&self) -> Option<SessionTokenId> {
        self.session_cookie
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(SessionTokenId::from)
    }
}

/// An established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub token: SessionToken,
    pub method: AuthMethod,
    /// The resolved user, present after federation.
    pub user: Option<User>,
    /// True if federation created the user.
    pub new_user: bool,
}

impl AuthenticatedSession {
    /// Returns the authenticated user's ID.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.token.user_id()
    }
}

/// Terminal result of one authentication call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Authenticated(AuthenticatedSession),
    /// The flow is suspended until the provider calls back.
    Redirect(LoginRedirect),
    Failed(AuthenticationError),
}

/// A decision plus the cookies to set or clear on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub decision: AuthDecision,
    pub cookies: Vec<CookieDirective>,
}

impl AuthOutcome {
    /// Returns the state the request ended in.
    #[must_use]
    pub fn state(&self) -> AuthState {
        match self.decision {
            AuthDecision::Authenticated(_) => AuthState::Authenticated,
            AuthDecision::Redirect(_) => AuthState::FederationPending,
            AuthDecision::Failed(_) => AuthState::Failed,
        }
    }

    fn failed(error: AuthenticationError, cookies: Vec<CookieDirective>) -> Self {
        Self {
            decision: AuthDecision::Failed(error),
            cookies,
        }
    }
}

/// Orchestrates the Token Lifecycle Manager, the Federation Client Adapter,
/// and the User Reconciliation Service.
#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenLifecycle,
    users: UserReconciler,
    federation: FederationClient,
    clock: Arc<dyn Clock>,
    cookies: CookiePolicy,
    auto_redirect: bool,
}

impl Authenticator {
    /// Creates an authenticator.
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        federation: FederationClient,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            tokens: TokenLifecycle::new(store.clone(), clock.clone(), policy.window),
            users: UserReconciler::new(store),
            federation,
            clock,
            cookies: policy.cookies,
            auto_redirect: policy.auto_redirect,
        }
    }

    /// Returns the cookie policy.
    #[must_use]
    pub fn cookie_policy(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// Returns the token lifecycle manager.
    #[must_use]
    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    /// Authenticates a request by its session cookie, falling back to a
    /// federation redirect when permitted.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, request: &RequestContext) -> AuthOutcome {
        let auto_redirect = request.auto_redirect.unwrap_or(self.auto_redirect);
        let mut cookies = Vec::new();
        let mut state = AuthState::Unauthenticated;

        if let Some(token_id) = request.session_token() {
            state = transition(state, AuthState::CookieValidating);
            match self.tokens.validate_and_rotate(&token_id).await {
                Ok(TokenValidation::Rotated(token)) => {
                    transition(state, AuthState::Authenticated);
                    return AuthOutcome {
                        cookies: vec![self.cookies.set_auth(&token)],
                        decision: AuthDecision::Authenticated(AuthenticatedSession {
                            token,
                            method: AuthMethod::SessionCookie,
                            user: None,
                            new_user: false,
                        }),
                    };
                }
                Ok(TokenValidation::Invalid) => {
                    cookies.push(self.cookies.clear(CookieName::Auth, self.clock.now()));
                }
                Err(report) => {
                    transition(state, AuthState::Failed);
                    return AuthOutcome::failed(log_failure(&report), cookies);
                }
            }
        }

        if !auto_redirect {
            transition(state, AuthState::Failed);
            return AuthOutcome::failed(
                AuthenticationError::InvalidCredential {
                    reason: "no valid session".to_string(),
                },
                cookies,
            );
        }

        transition(state, AuthState::FederationPending);
        AuthOutcome {
            decision: AuthDecision::Redirect(self.federation.begin()),
            cookies,
        }
    }

    /// Starts a federated login regardless of any session cookie.
    #[must_use]
    pub fn begin_login(&self) -> AuthOutcome {
        transition(AuthState::Unauthenticated, AuthState::FederationPending);
        AuthOutcome {
            decision: AuthDecision::Redirect(self.federation.begin()),
            cookies: Vec::new(),
        }
    }

    /// Resumes a suspended federated login from the provider's callback.
    #[instrument(skip_all)]
    pub async fn complete_login(&self, callback: &CallbackParams, flow: &FlowState) -> AuthOutcome {
        match self.federation.complete(callback, flow).await {
            FederationOutcome::Authenticated(login) => {
                self.establish(login, AuthMethod::Federation).await
            }
            FederationOutcome::Declined { reason } => {
                transition(AuthState::FederationPending, AuthState::Failed);
                AuthOutcome::failed(AuthenticationError::InvalidCredential { reason }, Vec::new())
            }
            FederationOutcome::ProtocolError { reason } => {
                transition(AuthState::FederationPending, AuthState::Failed);
                AuthOutcome::failed(AuthenticationError::Protocol { reason }, Vec::new())
            }
        }
    }

    /// Renews a session silently with the IdP refresh token.
    #[instrument(skip_all)]
    pub async fn authenticate_with_refresh_token(&self, refresh_token: &str) -> AuthOutcome {
        let clear_refresh = || vec![self.cookies.clear(CookieName::Refresh, self.clock.now())];

        if refresh_token.is_empty() {
            return AuthOutcome::failed(
                AuthenticationError::InvalidCredential {
                    reason: "empty refresh token".to_string(),
                },
                clear_refresh(),
            );
        }

        transition(AuthState::Unauthenticated, AuthState::FederationPending);
        match self.tokens.refresh(&self.federation, refresh_token).await {
            FederationOutcome::Authenticated(login) => {
                self.establish(login, AuthMethod::RefreshToken).await
            }
            FederationOutcome::Declined { reason } => {
                transition(AuthState::FederationPending, AuthState::Failed);
                AuthOutcome::failed(
                    AuthenticationError::InvalidCredential { reason },
                    clear_refresh(),
                )
            }
            FederationOutcome::ProtocolError { reason } => {
                transition(AuthState::FederationPending, AuthState::Failed);
                AuthOutcome::failed(AuthenticationError::Protocol { reason }, Vec::new())
            }
        }
    }

    async fn establish(&self, login: FederatedLogin, method: AuthMethod) -> AuthOutcome {
        let resolved = match self.users.resolve(&login.claims).await {
            Ok(resolved) => resolved,
            Err(report) => {
                transition(AuthState::FederationPending, AuthState::Failed);
                return AuthOutcome::failed(log_failure(&report), Vec::new());
            }
        };

        let token = match self.tokens.issue(resolved.user.id()).await {
            Ok(token) => token,
            Err(report) => {
                transition(AuthState::FederationPending, AuthState::Failed);
                return AuthOutcome::failed(log_failure(&report), Vec::new());
            }
        };

        let mut cookies = vec![self.cookies.set_auth(&token)];
        if let Some(refresh_token) = &login.refresh_token {
            cookies.push(self.cookies.set_refresh(refresh_token, self.clock.now()));
        }

        transition(AuthState::FederationPending, AuthState::Authenticated);
        info!(user_id = %resolved.user.id(), ?method, new_user = resolved.created, "session established");
        AuthOutcome {
            decision: AuthDecision::Authenticated(AuthenticatedSession {
                token,
                method,
                user: Some(resolved.user),
                new_user: resolved.created,
            }),
            cookies,
        }
    }
}

fn transition(from: AuthState, to: AuthState) -> AuthState {
    debug!(%from, %to, "authentication state transition");
    to
}

fn log_failure(report: &Report<AuthenticationError>) -> AuthenticationError {
    let error = report.current_context().clone();
    if error.is_fatal() {
        error!(error = %report, "authentication aborted");
    } else if error.is_invalid_credential() {
        info!(%error, "authentication rejected");
    } else {
        warn!(error = %report, "authentication failed");
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityClaims;
    use crate::error::ProviderError;
    use crate::federation::testing::{FakeProvider, Script, callback_with_code, flow_state};
    use crate::memory::MemoryCredentialStore;
    use chrono::Utc;
    use gatehouse_core::ManualClock;

    struct Harness {
        store: Arc<MemoryCredentialStore>,
        clock: Arc<ManualClock>,
        authenticator: Authenticator,
    }

    fn claims(username: &str) -> IdentityClaims {
        IdentityClaims::new("abc-1")
            .with_preferred_username(Some(username.to_string()))
            .with_email(Some("d@x.com".to_string()))
    }

    fn harness_with(provider: FakeProvider, auto_redirect: bool) -> Harness {
        let store = Arc::new(MemoryCredentialStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cookies = CookiePolicy::new("example.com", "/app", "/account", Duration::hours(8))
            .unwrap();
        let authenticator = Authenticator::new(
            store.clone(),
            FederationClient::new(provider).unwrap(),
            clock.clone(),
            SessionPolicy::new(cookies).with_auto_redirect(auto_redirect),
        );
        Harness {
            store,
            clock,
            authenticator,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeProvider::new(claims("dan")), true)
    }

    fn cookie<'a>(outcome: &'a AuthOutcome, name: CookieName) -> &'a CookieDirective {
        outcome
            .cookies
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no {} directive in {:?}", name.as_str(), outcome.cookies))
    }

    fn session(outcome: &AuthOutcome) -> &AuthenticatedSession {
        match &outcome.decision {
            AuthDecision::Authenticated(session) => session,
            other => panic!("expected authentication, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_login_creates_user_and_sets_both_cookies() {
        let h = harness();
        let outcome = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;

        assert_eq!(outcome.state(), AuthState::Authenticated);
        let session = session(&outcome);
        let user = session.user.as_ref().unwrap();
        assert!(session.new_user);
        assert_eq!(user.uuid(), "abc-1");
        assert_eq!(user.username(), Some("dan"));
        assert_eq!(user.email(), Some("d@x.com"));

        let auth = cookie(&outcome, CookieName::Auth);
        assert_eq!(auth.value, session.token.id().as_str());
        assert_eq!(auth.expires, h.clock.now() + Duration::minutes(30));
        let refresh = cookie(&outcome, CookieName::Refresh);
        assert_eq!(refresh.value, "refresh-1");
        assert_eq!(refresh.path, "/account");
        assert_eq!(refresh.expires, h.clock.now() + Duration::hours(8));

        assert_eq!(h.store.user_count().await, 1);
        assert_eq!(h.store.token_count().await, 1);
    }

    #[tokio::test]
    async fn second_login_updates_username_and_issues_new_token() {
        let h = harness();
        let first = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;

        // Same store, the provider now reports a new username.
        let authenticator = Authenticator::new(
            h.store.clone(),
            FederationClient::new(FakeProvider::new(claims("daniel"))).unwrap(),
            h.clock.clone(),
            SessionPolicy::new(h.authenticator.cookie_policy().clone()),
        );
        let second = authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;

        let (first, second) = (session(&first), session(&second));
        assert!(!second.new_user);
        assert_eq!(second.user_id(), first.user_id());
        assert_ne!(second.token.id(), first.token.id());
        let user = second.user.as_ref().unwrap();
        assert_eq!(user.username(), Some("daniel"));
        assert_eq!(user.email(), Some("d@x.com"));
        assert_eq!(h.store.user_count().await, 1);
        assert_eq!(h.store.token_count().await, 2);
    }

    #[tokio::test]
    async fn valid_cookie_is_rotated_without_federation() {
        let h = harness();
        let login = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;
        let token_id = session(&login).token.id().to_string();

        h.clock.advance(Duration::minutes(20));
        let outcome = h
            .authenticator
            .authenticate(&RequestContext::new(Some(token_id.clone())))
            .await;

        let session = session(&outcome);
        assert_eq!(session.method, AuthMethod::SessionCookie);
        assert_eq!(outcome.cookies.len(), 1);
        let auth = cookie(&outcome, CookieName::Auth);
        assert_eq!(auth.value, token_id);
        assert_eq!(auth.expires, h.clock.now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn unknown_cookie_is_cleared_and_falls_through_to_federation() {
        let h = harness();
        let outcome = h
            .authenticator
            .authenticate(&RequestContext::new(Some("missing".to_string())))
            .await;

        assert_eq!(outcome.state(), AuthState::FederationPending);
        let AuthDecision::Redirect(redirect) = &outcome.decision else {
            panic!("expected redirect");
        };
        assert!(redirect.authorization_url.starts_with("https://idp.example.com/"));
        let clear = cookie(&outcome, CookieName::Auth);
        assert!(clear.removal);
        assert_eq!(clear.path, "/app");
    }

    #[tokio::test]
    async fn expired_cookie_without_auto_redirect_fails_and_clears() {
        let h = harness_with(FakeProvider::new(claims("dan")), false);
        let login = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;
        let token_id = session(&login).token.id().to_string();

        h.clock.advance(Duration::minutes(31));
        let outcome = h
            .authenticator
            .authenticate(&RequestContext::new(Some(token_id)))
            .await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::InvalidCredential { .. })
        ));
        assert_eq!(outcome.cookies.len(), 1);
        assert!(cookie(&outcome, CookieName::Auth).removal);
    }

    #[tokio::test]
    async fn request_override_disables_redirect() {
        let h = harness();
        let outcome = h
            .authenticator
            .authenticate(&RequestContext::new(None).with_auto_redirect(false))
            .await;

        assert_eq!(outcome.state(), AuthState::Failed);
        assert!(outcome.cookies.is_empty());
    }

    #[tokio::test]
    async fn no_cookie_redirects_without_directives() {
        let h = harness();
        let outcome = h.authenticator.authenticate(&RequestContext::new(None)).await;

        assert_eq!(outcome.state(), AuthState::FederationPending);
        assert!(outcome.cookies.is_empty());
    }

    #[tokio::test]
    async fn store_outage_during_validation_leaves_cookies_alone() {
        let h = harness();
        h.store.set_unavailable(true);
        let outcome = h
            .authenticator
            .authenticate(&RequestContext::new(Some("tok".to_string())))
            .await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::Persistence { .. })
        ));
        assert!(outcome.cookies.is_empty());
    }

    #[tokio::test]
    async fn store_outage_during_login_sets_no_cookies() {
        let h = harness();
        h.store.set_unavailable(true);
        let outcome = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::Persistence { .. })
        ));
        assert!(outcome.cookies.is_empty());
    }

    #[tokio::test]
    async fn declined_login_fails_as_invalid_credential() {
        let h = harness();
        let callback = CallbackParams {
            error: Some("access_denied".to_string()),
            state: Some("csrf-1".to_string()),
            ..CallbackParams::default()
        };
        let outcome = h.authenticator.complete_login(&callback, &flow_state()).await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::InvalidCredential { .. })
        ));
        assert_eq!(h.store.user_count().await, 0);
    }

    #[tokio::test]
    async fn missing_subject_creates_nothing() {
        let h = harness_with(FakeProvider::new(IdentityClaims::default()), true);
        let outcome = h
            .authenticator
            .complete_login(&callback_with_code(), &flow_state())
            .await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::MissingClaim { .. })
        ));
        assert!(outcome.cookies.is_empty());
        assert_eq!(h.store.user_count().await, 0);
        assert_eq!(h.store.token_count().await, 0);
    }

    #[tokio::test]
    async fn refresh_token_renews_session_and_rotates_refresh_cookie() {
        let h = harness();
        let outcome = h
            .authenticator
            .authenticate_with_refresh_token("refresh-1")
            .await;

        let session = session(&outcome);
        assert_eq!(session.method, AuthMethod::RefreshToken);
        assert_eq!(cookie(&outcome, CookieName::Refresh).value, "refresh-2");
        assert!(!cookie(&outcome, CookieName::Auth).removal);
    }

    #[tokio::test]
    async fn refresh_without_rotation_keeps_refresh_cookie() {
        let provider = FakeProvider::new(claims("dan"))
            .with_refresh(Script::Grant(crate::federation::testing::grant(None)));
        let h = harness_with(provider, true);
        let outcome = h
            .authenticator
            .authenticate_with_refresh_token("refresh-1")
            .await;

        assert_eq!(outcome.state(), AuthState::Authenticated);
        assert!(outcome.cookies.iter().all(|c| c.name == CookieName::Auth));
    }

    #[tokio::test]
    async fn rejected_refresh_token_clears_refresh_cookie() {
        let provider = FakeProvider::new(claims("dan")).with_refresh(Script::Fail(
            ProviderError::Rejected {
                reason: "invalid_grant".to_string(),
            },
        ));
        let h = harness_with(provider, true);
        let outcome = h
            .authenticator
            .authenticate_with_refresh_token("stale")
            .await;

        assert_eq!(outcome.state(), AuthState::Failed);
        let clear = cookie(&outcome, CookieName::Refresh);
        assert!(clear.removal);
        assert_eq!(clear.path, "/account");
    }

    #[tokio::test]
    async fn refresh_protocol_error_keeps_refresh_cookie() {
        let provider = FakeProvider::new(claims("dan")).with_refresh(Script::Fail(
            ProviderError::Transport {
                reason: "timeout".to_string(),
            },
        ));
        let h = harness_with(provider, true);
        let outcome = h
            .authenticator
            .authenticate_with_refresh_token("refresh-1")
            .await;

        assert!(matches!(
            outcome.decision,
            AuthDecision::Failed(AuthenticationError::Protocol { .. })
        ));
        assert!(outcome.cookies.is_empty());
    }

    #[test]
    fn begin_login_always_redirects() {
        let h = harness();
        let outcome = h.authenticator.begin_login();
        assert_eq!(outcome.state(), AuthState::FederationPending);
    }
}
