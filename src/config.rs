use reqwest::Url;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const ENV_API_URL: &str = "AUTHCLIENT_API_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "AUTHCLIENT_REQUEST_TIMEOUT_MS";
pub const ENV_TOKEN_EXPIRES_IN_MINS: &str = "AUTHCLIENT_TOKEN_EXPIRES_IN_MINS";
pub const ENV_POLL_INTERVAL_MS: &str = "AUTHCLIENT_POLL_INTERVAL_MS";
pub const ENV_KEYRING_SERVICE: &str = "AUTHCLIENT_KEYRING_SERVICE";

const DEFAULT_API_URL: &str = "https://dummyjson.com";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_TOKEN_EXPIRES_IN_MINS: u32 = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_KEYRING_SERVICE: &str = "com.authclient.tokens";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("{var} must be an absolute http(s) URL, got `{value}`")]
  InvalidUrl { var: &'static str, value: String },
  #[error("{var} must be a positive integer, got `{value}`")]
  NotPositive { var: &'static str, value: String },
}

/// Source of environment variables, swappable in tests.
pub trait EnvironmentProvider {
  fn get_var(&self, key: &str) -> Option<String>;
}

pub struct SystemEnvironment;

impl EnvironmentProvider for SystemEnvironment {
  fn get_var(&self, key: &str) -> Option<String> {
    std::env::var(key).ok()
  }
}

impl EnvironmentProvider for HashMap<String, String> {
  fn get_var(&self, key: &str) -> Option<String> {
    self.get(key).cloned()
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub api_base_url: Url,
  pub request_timeout: Duration,
  pub token_expires_in_mins: u32,
  pub poll_interval: Duration,
  pub keyring_service: String,
}

fn read(env: &dyn EnvironmentProvider, var: &str) -> Option<String> {
  let v = env.get_var(var)?;
  let s = v.trim();
  if s.is_empty() {
    None
  } else {
    Some(s.to_string())
  }
}

fn read_positive<T>(env: &dyn EnvironmentProvider, var: &'static str, fallback: T) -> Result<T, ConfigError>
where
  T: std::str::FromStr + PartialOrd + Default,
{
  let Some(raw) = read(env, var) else {
    return Ok(fallback);
  };
  match raw.parse::<T>() {
    Ok(n) if n > T::default() => Ok(n),
    _ => Err(ConfigError::NotPositive { var, value: raw }),
  }
}

fn read_url(env: &dyn EnvironmentProvider) -> Result<Url, ConfigError> {
  let raw = read(env, ENV_API_URL).unwrap_or_else(|| DEFAULT_API_URL.to_string());
  let invalid = || ConfigError::InvalidUrl {
    var: ENV_API_URL,
    value: raw.clone(),
  };
  let url = Url::parse(&raw).map_err(|_| invalid())?;
  if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
    return Err(invalid());
  }
  Ok(url)
}

impl AppConfig {
  pub fn from_env(env: &dyn EnvironmentProvider) -> Result<Self, ConfigError> {
    Ok(Self {
      api_base_url: read_url(env)?,
      request_timeout: Duration::from_millis(read_positive(
        env,
        ENV_REQUEST_TIMEOUT_MS,
        DEFAULT_REQUEST_TIMEOUT_MS,
      )?),
      token_expires_in_mins: read_positive(
        env,
        ENV_TOKEN_EXPIRES_IN_MINS,
        DEFAULT_TOKEN_EXPIRES_IN_MINS,
      )?,
      poll_interval: Duration::from_millis(read_positive(
        env,
        ENV_POLL_INTERVAL_MS,
        DEFAULT_POLL_INTERVAL_MS,
      )?),
      keyring_service: read(env, ENV_KEYRING_SERVICE)
        .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string()),
    })
  }
}
