use super::hooks::{ForceLogout, SessionHooks};
use crate::auth_api::AuthApi;
use crate::config::AppConfig;
use crate::http::{
    Dispatcher, HttpError, HttpResponse, ReqwestDispatcher, RequestDescriptor,
    TokenRefreshCoordinator,
};
use crate::redact::redact_secrets;
use crate::secrets::{SecretStore, TokenStorage};
use crate::types::{AuthState, AuthTokens, User};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to persist tokens")]
    PersistTokens,
    #[error("failed to build http client")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("network error, check your connection")]
    Network,
    #[error("sign-in failed: {0}")]
    Other(HttpError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<HttpError> for SignInError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport { .. } => Self::Network,
            HttpError::Unauthorized { .. } | HttpError::Status { status: 400, .. } => {
                Self::InvalidCredentials
            }
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub token_expires_in_mins: u32,
    pub refresh_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            token_expires_in_mins: config.token_expires_in_mins,
            refresh_timeout: Some(config.request_timeout),
        }
    }
}

pub(super) struct SessionInner {
    storage: TokenStorage,
    api: AuthApi,
    coordinator: Arc<TokenRefreshCoordinator>,
    state: watch::Sender<AuthState>,
    shutdown: watch::Sender<bool>,
}

/// Owns the authentication state and the token refresh coordinator for one
/// application session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct SessionController {
    pub(super) inner: Arc<SessionInner>,
}

impl SessionController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<dyn SecretStore>,
        options: SessionOptions,
    ) -> Self {
        let storage = TokenStorage::new(store);
        let (force_tx, force_rx) = mpsc::unbounded_channel();

        let refresh_api = AuthApi::new(
            dispatcher.clone(),
            dispatcher.clone(),
            options.token_expires_in_mins,
        );
        let hooks = Arc::new(SessionHooks::new(storage.clone(), refresh_api, force_tx));

        let mut coordinator = TokenRefreshCoordinator::new(dispatcher.clone(), hooks);
        if let Some(limit) = options.refresh_timeout {
            coordinator = coordinator.with_refresh_timeout(limit);
        }
        let coordinator = Arc::new(coordinator);

        let api = AuthApi::new(
            coordinator.clone(),
            dispatcher,
            options.token_expires_in_mins,
        );

        let (state, _) = watch::channel(AuthState::Loading);
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            storage,
            api,
            coordinator,
            state,
            shutdown,
        });

        spawn_force_logout_listener(Arc::downgrade(&inner), force_rx);
        Self { inner }
    }

    pub fn from_config(config: &AppConfig, store: Arc<dyn SecretStore>) -> Result<Self, SessionError> {
        let dispatcher = ReqwestDispatcher::new(&config.api_base_url, config.request_timeout)?;
        Ok(Self::new(
            Arc::new(dispatcher),
            store,
            SessionOptions::from_config(config),
        ))
    }

    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    pub fn api(&self) -> &AuthApi {
        &self.inner.api
    }

    pub fn coordinator(&self) -> &Arc<TokenRefreshCoordinator> {
        &self.inner.coordinator
    }

    pub fn storage(&self) -> &TokenStorage {
        &self.inner.storage
    }

    /// Sends a business request with bearer attachment and token recovery.
    pub async fn execute(&self, request: RequestDescriptor) -> Result<HttpResponse, HttpError> {
        self.inner.coordinator.execute(request).await
    }

    fn set_state(&self, next: AuthState) {
        self.inner.state.send_replace(next);
    }

    /// Resolves the initial state from stored tokens. An expired access token is
    /// recovered by the coordinator while fetching the profile.
    pub async fn bootstrap(&self) -> AuthState {
        let next = self.resolve_stored_session().await;
        self.set_state(next.clone());
        next
    }

    async fn resolve_stored_session(&self) -> AuthState {
        let storage = &self.inner.storage;
        if storage.get_access_token().await.is_none() || storage.get_refresh_token().await.is_none() {
            debug!("no stored session");
            return AuthState::Unauthenticated;
        }

        let user = match self.inner.api.get_me().await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %redact_secrets(&e.to_string()), "stored session could not be restored");
                return AuthState::Unauthenticated;
            }
        };

        // The profile call may have rotated the pair.
        match (storage.get_access_token().await, storage.get_refresh_token().await) {
            (Some(access_token), Some(refresh_token)) => {
                info!(user_id = user.id, "session restored");
                AuthState::Authenticated {
                    user,
                    tokens: AuthTokens {
                        access_token,
                        refresh_token,
                    },
                }
            }
            _ => AuthState::Unauthenticated,
        }
    }

    pub async fn login(&self, user: User, tokens: AuthTokens) -> Result<(), SessionError> {
        if !self
            .inner
            .storage
            .save(&tokens.access_token, &tokens.refresh_token)
            .await
        {
            return Err(SessionError::PersistTokens);
        }
        info!(user_id = user.id, "signed in");
        self.set_state(AuthState::Authenticated { user, tokens });
        Ok(())
    }

    /// Login endpoint followed by [`Self::login`].
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<User, SignInError> {
        let res = self.inner.api.login(username, password).await?;
        self.login(res.user.clone(), res.tokens).await?;
        Ok(res.user)
    }

    pub async fn logout(&self) {
        // Stops any in-flight refresh before it can persist a new pair.
        self.inner.coordinator.reset_state().await;
        self.inner.storage.clear().await;
        self.set_state(AuthState::Unauthenticated);
        info!("signed out");
    }

    /// Replaces the profile of an authenticated session; no-op otherwise.
    pub fn refresh_user(&self, user: User) {
        self.inner.state.send_if_modified(|state| match state {
            AuthState::Authenticated { user: current, .. } if *current != user => {
                *current = user;
                true
            }
            _ => false,
        });
    }

    /// Ends the session: stops interception and background tasks.
    pub async fn shutdown(&self) {
        self.inner.coordinator.eject().await;
        self.inner.shutdown.send_replace(true);
    }

    pub(super) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub(super) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(inner: &Weak<SessionInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}

fn spawn_force_logout_listener(
    session: Weak<SessionInner>,
    mut rx: mpsc::UnboundedReceiver<ForceLogout>,
) {
    tokio::spawn(async move {
        while let Some(reason) = rx.recv().await {
            let Some(session) = SessionController::upgrade(&session) else {
                break;
            };
            warn!(?reason, "forcing logout");
            session.logout().await;
        }
    });
}
