//! OIDC client implementation using the openidconnect crate.

use async_trait::async_trait;
use gatehouse_access::{
    FlowState, IdentityClaims, IdentityProvider, LoginRedirect, OidcConfig, ProviderError,
    ProviderGrant,
};
use openidconnect::core::{
    CoreAuthenticationFlow, CoreClient, CoreErrorResponseType, CoreProviderMetadata,
    CoreTokenResponse, CoreUserInfoClaims,
};
use openidconnect::{
    AccessToken, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet,
    EndpointNotSet, EndpointSet, IssuerUrl, Nonce, OAuth2TokenResponse, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardErrorResponse,
    SubjectIdentifier, TokenResponse,
};
use rootcause::prelude::Report;
use std::time::Duration;
use tracing::{debug, instrument};

type DiscoveredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// OIDC client for authenticating users.
pub struct OidcClient {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    http_client: reqwest::Client,
    config: OidcConfig,
}

impl OidcClient {
    /// Creates a new OIDC client by discovering the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` for invalid configuration and
    /// `ProviderError::Transport` if discovery fails.
    pub async fn discover(
        config: OidcConfig,
        timeout: Duration,
    ) -> Result<Self, Report<ProviderError>> {
        config
            .validate()
            .map_err(|e| ProviderError::Configuration {
                reason: e.to_string(),
            })?;

        let issuer_url = IssuerUrl::new(config.issuer_url().to_string()).map_err(|e| {
            ProviderError::Configuration {
                reason: format!("invalid issuer URL: {e}"),
            }
        })?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration {
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| ProviderError::Transport {
                reason: format!("failed to discover provider: {e}"),
            })?;

        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string()).map_err(|e| {
            ProviderError::Configuration {
                reason: format!("invalid redirect URI: {e}"),
            }
        })?;

        Ok(Self {
            provider_metadata,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            redirect_url,
            http_client,
            config,
        })
    }

    fn client(&self) -> DiscoveredClient {
        CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone())
    }

    fn grant_from_response(
        &self,
        client: &DiscoveredClient,
        response: &CoreTokenResponse,
        nonce: Option<&Nonce>,
    ) -> Result<ProviderGrant, Report<ProviderError>> {
        let subject = match (response.id_token(), nonce) {
            (Some(id_token), Some(nonce)) => Some(
                id_token
                    .claims(&client.id_token_verifier(), nonce)
                    .map_err(|e| ProviderError::Validation {
                        reason: format!("ID token validation failed: {e}"),
                    })?
                    .subject()
                    .to_string(),
            ),
            // Refreshed ID tokens carry no nonce.
            (Some(id_token), None) => Some(
                id_token
                    .claims(&client.id_token_verifier(), |_: Option<&Nonce>| {
                        Ok::<(), String>(())
                    })
                    .map_err(|e| ProviderError::Validation {
                        reason: format!("ID token validation failed: {e}"),
                    })?
                    .subject()
                    .to_string(),
            ),
            (None, Some(_)) => {
                return Err(ProviderError::Validation {
                    reason: "no ID token in response".to_string(),
                }
                .into());
            }
            (None, None) => None,
        };

        Ok(ProviderGrant {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|t| t.secret().clone()),
            subject,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn redirect_url(&self) -> &str {
        self.redirect_url.as_str()
    }

    fn set_redirect_url(&mut self, url: String) -> Result<(), Report<ProviderError>> {
        self.redirect_url = RedirectUrl::new(url).map_err(|e| ProviderError::Configuration {
            reason: format!("invalid redirect URI: {e}"),
        })?;
        Ok(())
    }

    fn authorization_url(&self) -> LoginRedirect {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let client = self.client();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        for scope in self.config.scopes() {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        LoginRedirect {
            authorization_url: auth_url.to_string(),
            state: FlowState {
                csrf_token: csrf_token.secret().clone(),
                pkce_verifier: pkce_verifier.secret().clone(),
                nonce: nonce.secret().clone(),
            },
        }
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        state: &FlowState,
    ) -> Result<ProviderGrant, Report<ProviderError>> {
        let client = self.client();

        let response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| ProviderError::Configuration {
                reason: format!("token endpoint error: {e}"),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(state.pkce_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(token_error)?;

        debug!("authorization code exchanged");
        let nonce = Nonce::new(state.nonce.clone());
        self.grant_from_response(&client, &response, Some(&nonce))
    }

    #[instrument(skip_all)]
    async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<ProviderGrant, Report<ProviderError>> {
        let client = self.client();
        let refresh_token = RefreshToken::new(refresh_token.to_string());

        let response = client
            .exchange_refresh_token(&refresh_token)
            .map_err(|e| ProviderError::Configuration {
                reason: format!("token endpoint error: {e}"),
            })?
            .request_async(&self.http_client)
            .await
            .map_err(token_error)?;

        debug!(rotated = response.refresh_token().is_some(), "refresh grant completed");
        self.grant_from_response(&client, &response, None)
    }

    #[instrument(skip_all)]
    async fn request_user_info(
        &self,
        grant: &ProviderGrant,
    ) -> Result<IdentityClaims, Report<ProviderError>> {
        let expected_subject = grant.subject.clone().map(SubjectIdentifier::new);

        let user_info: CoreUserInfoClaims = self
            .client()
            .user_info(AccessToken::new(grant.access_token.clone()), expected_subject)
            .map_err(|e| ProviderError::Configuration {
                reason: format!("userinfo endpoint error: {e}"),
            })?
            .request_async(&self.http_client)
            .await
            .map_err(|e| ProviderError::Transport {
                reason: format!("userinfo request failed: {e}"),
            })?;

        Ok(IdentityClaims::new(user_info.subject().to_string())
            .with_preferred_username(
                user_info
                    .preferred_username()
                    .map(|u| u.as_str().to_string()),
            )
            .with_email(user_info.email().map(|e| e.as_str().to_string())))
    }
}

/// Classifies a token endpoint failure. Only `invalid_grant` means the
/// credential itself was refused.
fn token_error<RE>(
    e: RequestTokenError<RE, StandardErrorResponse<CoreErrorResponseType>>,
) -> ProviderError
where
    RE: std::error::Error + 'static,
{
    match e {
        RequestTokenError::ServerResponse(response)
            if *response.error() == CoreErrorResponseType::InvalidGrant =>
        {
            ProviderError::Rejected {
                reason: response.to_string(),
            }
        }
        RequestTokenError::ServerResponse(response) => ProviderError::Validation {
            reason: format!("token endpoint refused the request: {response}"),
        },
        RequestTokenError::Request(e) => ProviderError::Transport {
            reason: format!("token request failed: {e}"),
        },
        RequestTokenError::Parse(e, _) => ProviderError::Validation {
            reason: format!("malformed token response: {e}"),
        },
        RequestTokenError::Other(reason) => ProviderError::Transport { reason },
    }
}
