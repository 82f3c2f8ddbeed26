//! Session-cookie and OIDC authentication for gatehouse.
//!
//! This crate provides:
//! - The Credential Store seam (`CredentialStore`) and an in-memory store
//! - The Token Lifecycle Manager (`TokenLifecycle`)
//! - The Federation Client Adapter (`FederationClient`, `IdentityProvider`)
//! - The User Reconciliation Service (`UserReconciler`)
//! - The `Authenticator` that orchestrates them and emits cookie directives
//!
//! # Example
//!
//! ```
//! use gatehouse_access::{CookieName, CookiePolicy, SessionToken};
//! use gatehouse_core::{SessionTokenId, UserId};
//! use chrono::{Duration, Utc};
//!
//! let policy = CookiePolicy::new("example.com", "/app", "/account", Duration::hours(8))
//!     .expect("domain is set");
//! let token = SessionToken::new(
//!     SessionTokenId::from("opaque"),
//!     UserId::new(1),
//!     Utc::now() + Duration::minutes(30),
//! );
//!
//! let directive = policy.set_auth(&token);
//! assert_eq!(directive.name, CookieName::Auth);
//! assert_eq!(directive.path, "/app");
//! ```

pub mod auth;
pub mod authenticator;
pub mod cookie;
pub mod error;
pub mod federation;
pub mod memory;
pub mod oidc;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod tokens;
pub mod user;

// Re-export main types at crate root
pub use auth::{CallbackParams, FederatedLogin, FlowState, IdentityClaims, LoginRedirect};
pub use authenticator::{
    AuthDecision, AuthMethod, AuthOutcome, AuthState, AuthenticatedSession, Authenticator,
    RequestContext, SessionPolicy,
};
pub use cookie::{CookieDirective, CookieName, CookiePolicy, DEFAULT_REFRESH_COOKIE_HOURS};
pub use error::{AuthenticationError, ConfigError, ProviderError, StoreError};
pub use federation::{FederationClient, FederationOutcome, IdentityProvider, ProviderGrant};
pub use memory::MemoryCredentialStore;
pub use oidc::OidcConfig;
pub use reconcile::{ResolvedUser, UserReconciler};
pub use session::{SessionToken, TokenValidation};
pub use store::CredentialStore;
pub use tokens::{DEFAULT_SESSION_WINDOW_MINUTES, TokenLifecycle};
pub use user::{NewUser, ProfileUpdate, User};
