use super::{HttpError, HttpResponse, RequestDescriptor};
use crate::redact::redact_secrets;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::Url;
use std::time::Duration;

/// Performs the network call for a descriptor and classifies the outcome.
#[async_trait]
pub trait Dispatcher: Send + Sync {
  async fn dispatch(&self, request: &RequestDescriptor) -> Result<HttpResponse, HttpError>;
}

fn map_failure(status_code: u16, body: String) -> HttpError {
  match status_code {
    401 => HttpError::Unauthorized { body },
    status => HttpError::Status { status, body },
  }
}

fn transport_error(err: &reqwest::Error) -> HttpError {
  HttpError::Transport {
    message: redact_secrets(&err.to_string()).to_string(),
    timed_out: err.is_timeout(),
  }
}

pub struct ReqwestDispatcher {
  http: reqwest::Client,
  base_url: String,
}

impl ReqwestDispatcher {
  pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, reqwest::Error> {
    Ok(Self {
      http: reqwest::Client::builder().timeout(timeout).build()?,
      base_url: base_url.as_str().trim_end_matches('/').to_string(),
    })
  }

  fn url_for(&self, path: &str) -> Result<Url, HttpError> {
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{}/{path}", self.base_url)).map_err(|e| HttpError::Transport {
      message: format!("invalid request url: {e}"),
      timed_out: false,
    })
  }
}

#[async_trait]
impl Dispatcher for ReqwestDispatcher {
  async fn dispatch(&self, request: &RequestDescriptor) -> Result<HttpResponse, HttpError> {
    let url = self.url_for(&request.path)?;

    let mut builder = self
      .http
      .request(request.method.clone(), url)
      .headers(request.headers.clone())
      .header(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let res = match builder.send().await {
      Ok(r) => r,
      Err(e) => return Err(transport_error(&e)),
    };

    let status = res.status().as_u16();
    let success = res.status().is_success();
    let body = match res.text().await {
      Ok(t) => t,
      Err(e) => return Err(transport_error(&e)),
    };

    if !success {
      return Err(map_failure(status, body));
    }
    Ok(HttpResponse { status, body })
  }
}
