use crate::error::*;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Head,
  Post,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
    };
    f.write_str(name)
  }
}

/// A request handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn get(url: impl Into<String>) -> Self {
    HttpRequest {
      method: Method::Get,
      url: url.into(),
      headers: vec![],
      body: None,
    }
  }

  pub fn head(url: impl Into<String>) -> Self {
    HttpRequest {
      method: Method::Head,
      ..HttpRequest::get(url)
    }
  }

  /// A POST carrying a signed JWS body.
  pub fn jose(url: impl Into<String>, body: Vec<u8>) -> Self {
    HttpRequest {
      method: Method::Post,
      url: url.into(),
      headers: vec![(
        "content-type".to_string(),
        "application/jose+json".to_string(),
      )],
      body: Some(body),
    }
  }
}

/// A response returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl HttpResponse {
  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.iter().find_map(|(key, value)| {
      if key.eq_ignore_ascii_case(name) {
        Some(value.as_str())
      } else {
        None
      }
    })
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
    Ok(serde_json::from_slice(&self.body)?)
  }

  /// Turns a non-success response into an [`Error::Server`].
  pub(crate) fn error_for_status(self) -> Result<Self, Error> {
    if self.is_success() {
      return Ok(self);
    }
    let err = serde_json::from_slice::<ServerError>(&self.body)
      .ok()
      .filter(|err| err.r#type.is_some() || err.detail.is_some())
      .map(|mut err| {
        err.status.get_or_insert(self.status);
        err
      })
      .unwrap_or_else(|| ServerError::from_status(self.status, &self.body));
    Err(err.into())
  }

  pub(crate) fn location(&self, context: &'static str) -> Result<String, Error> {
    self
      .header("location")
      .map(|location| location.to_string())
      .ok_or_else(|| transport_err(context))
  }
}

/// Issues HTTP requests on behalf of the client. Redirects, TLS, and
/// connection management are entirely the implementation's business.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn request(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

/// The user agent sent by [`ReqwestTransport`] unless one is configured.
pub fn default_user_agent() -> String {
  format!(
    "{}/{} ({}; {})",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION"),
    std::env::consts::OS,
    std::env::consts::ARCH
  )
}

/// [`Transport`] backed by a [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
  http_client: reqwest::Client,
  user_agent: String,
}

impl ReqwestTransport {
  pub fn new(http_client: reqwest::Client) -> Self {
    ReqwestTransport {
      http_client,
      user_agent: default_user_agent(),
    }
  }

  /// Appends a product token (like `my-app/1.0`) to the default user agent.
  pub fn with_user_agent(mut self, product: &str) -> Self {
    let product = product.trim();
    if !product.is_empty() {
      self.user_agent = format!("{} {}", default_user_agent(), product);
    }
    self
  }

  pub fn user_agent(&self) -> &str {
    &self.user_agent
  }
}

impl Default for ReqwestTransport {
  fn default() -> Self {
    ReqwestTransport::new(reqwest::Client::new())
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn request(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Head => reqwest::Method::HEAD,
      Method::Post => reqwest::Method::POST,
    };
    let mut builder = self
      .http_client
      .request(method, &request.url)
      .header(reqwest::header::USER_AGENT, &self.user_agent);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let resp = builder.send().await?;

    let status = resp.status().as_u16();
    let mut headers = vec![];
    for (name, value) in resp.headers() {
      let value = map_transport_err(value.to_str())?;
      headers.push((name.as_str().to_string(), value.to_string()));
    }
    let body = resp.bytes().await?.to_vec();

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}
