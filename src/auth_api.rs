use crate::http::{Dispatcher, HttpError, RequestDescriptor, REFRESH_PATH};
use crate::types::{AuthTokens, LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, User};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

pub const LOGIN_PATH: &str = "/auth/login";
pub const ME_PATH: &str = "/auth/me";

fn to_body<T: Serialize>(payload: &T) -> Result<Value, HttpError> {
  serde_json::to_value(payload).map_err(|e| HttpError::Decode(e.to_string()))
}

fn check_tokens(tokens: &AuthTokens) -> Result<(), HttpError> {
  if tokens.is_complete() {
    Ok(())
  } else {
    Err(HttpError::Decode("response carried an empty token".to_string()))
  }
}

/// Client for the auth endpoints. Identity calls go through `session` (normally the
/// token refresh coordinator); login and refresh carry their own credentials and use
/// the bare `public` transport.
#[derive(Clone)]
pub struct AuthApi {
  session: Arc<dyn Dispatcher>,
  public: Arc<dyn Dispatcher>,
  expires_in_mins: u32,
}

impl AuthApi {
  pub fn new(session: Arc<dyn Dispatcher>, public: Arc<dyn Dispatcher>, expires_in_mins: u32) -> Self {
    Self {
      session,
      public,
      expires_in_mins,
    }
  }

  pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, HttpError> {
    let payload = LoginRequest {
      username: username.to_string(),
      password: password.to_string(),
      expires_in_mins: Some(self.expires_in_mins),
    };
    let res = self
      .public
      .dispatch(&RequestDescriptor::post(LOGIN_PATH, to_body(&payload)?))
      .await?;
    let parsed: LoginResponse = res.json()?;
    check_tokens(&parsed.tokens)?;
    Ok(parsed)
  }

  pub async fn get_me(&self) -> Result<User, HttpError> {
    self.session.dispatch(&RequestDescriptor::get(ME_PATH)).await?.json()
  }

  pub async fn refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse, HttpError> {
    let payload = RefreshRequest {
      refresh_token: refresh_token.to_string(),
      expires_in_mins: self.expires_in_mins,
    };
    let res = self
      .public
      .dispatch(&RequestDescriptor::post(REFRESH_PATH, to_body(&payload)?))
      .await?;
    let tokens: RefreshResponse = res.json()?;
    check_tokens(&tokens)?;
    Ok(tokens)
  }
}
