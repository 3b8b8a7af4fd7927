use crate::auth_api::AuthApi;
use crate::http::{RefreshError, RefreshHooks};
use crate::secrets::TokenStorage;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// Why the session should be torn down from outside a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceLogout {
    RefreshFailed,
}

pub(crate) struct SessionHooks {
    storage: TokenStorage,
    api: AuthApi,
    force_logout: mpsc::UnboundedSender<ForceLogout>,
}

impl SessionHooks {
    pub(crate) fn new(
        storage: TokenStorage,
        api: AuthApi,
        force_logout: mpsc::UnboundedSender<ForceLogout>,
    ) -> Self {
        Self {
            storage,
            api,
            force_logout,
        }
    }
}

#[async_trait]
impl RefreshHooks for SessionHooks {
    async fn get_access_token(&self) -> Option<String> {
        self.storage.get_access_token().await
    }

    async fn refresh_tokens(&self) -> Result<String, RefreshError> {
        let stored = self
            .storage
            .get_refresh_token()
            .await
            .ok_or(RefreshError::MissingRefreshToken)?;

        let tokens = self
            .api
            .refresh_token(&stored)
            .await
            .map_err(|e| RefreshError::Endpoint(Box::new(e)))?;

        if !self
            .storage
            .save(&tokens.access_token, &tokens.refresh_token)
            .await
        {
            return Err(RefreshError::Persist);
        }
        Ok(tokens.access_token)
    }

    fn on_refresh_failed(&self) {
        if self.force_logout.send(ForceLogout::RefreshFailed).is_err() {
            warn!("session is gone; dropping force-logout signal");
        }
    }
}
