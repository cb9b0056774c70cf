use crate::directory::Directory;
use crate::error::*;
use crate::jws::jws;
use crate::nonce::NonceManager;
use crate::transport::HttpRequest;
use crate::transport::HttpResponse;
use crate::transport::ReqwestTransport;
use crate::transport::Transport;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::instrument;
use tracing::Level;

/// How often, and how many times, a status is re-fetched while the server
/// is still working on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
  pub interval: Duration,
  /// `None` polls until the server reaches a terminal status.
  pub max_attempts: Option<u32>,
}

impl PollPolicy {
  pub const fn new(interval: Duration, max_attempts: u32) -> Self {
    PollPolicy {
      interval,
      max_attempts: Some(max_attempts),
    }
  }

  pub const fn unbounded(interval: Duration) -> Self {
    PollPolicy {
      interval,
      max_attempts: None,
    }
  }

  /// Challenge polling: every second, for at most five minutes.
  pub const fn challenge_default() -> Self {
    PollPolicy::new(Duration::from_secs(1), 300)
  }

  /// Order polling: every 1.1 seconds, for at most 330 seconds.
  pub const fn order_default() -> Self {
    PollPolicy::new(Duration::from_millis(1100), 300)
  }

  /// Sleeps for one interval, or fails once `attempts` reaches the bound.
  pub(crate) async fn wait(&self, attempts: &mut u32) -> Result<(), Error> {
    if let Some(max) = self.max_attempts {
      if *attempts >= max {
        return Err(Error::MaxAttemptsExceeded);
      }
    }
    *attempts += 1;
    debug!(delay = ?self.interval, attempt = *attempts, "Waiting to poll");
    tokio::time::sleep(self.interval).await;
    Ok(())
  }
}

/// How authorization, challenge, and order resources are read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
  /// A plain, unsigned GET.
  #[default]
  Get,
  /// A signed POST with an empty payload, for servers that refuse
  /// unauthenticated GETs.
  PostAsGet,
}

#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
  pub challenge_poll: PollPolicy,
  pub order_poll: PollPolicy,
  pub deadline: Option<Duration>,
  pub fetch_mode: FetchMode,
}

/// Configures and initializes a [`Session`].
pub struct SessionBuilder {
  url: String,
  transport: Option<Arc<dyn Transport>>,
  http_client: Option<reqwest::Client>,
  user_agent: Option<String>,
  challenge_poll: PollPolicy,
  order_poll: PollPolicy,
  deadline: Option<Duration>,
  fetch_mode: FetchMode,
}

impl SessionBuilder {
  pub fn new(url: String) -> Self {
    SessionBuilder {
      url,
      transport: None,
      http_client: None,
      user_agent: None,
      challenge_poll: PollPolicy::challenge_default(),
      order_poll: PollPolicy::order_default(),
      deadline: None,
      fetch_mode: FetchMode::Get,
    }
  }

  /// Replaces the default reqwest-backed transport entirely. When set,
  /// `http_client` and `user_agent` are ignored.
  pub fn transport(&mut self, transport: Arc<dyn Transport>) -> &mut Self {
    self.transport = Some(transport);
    self
  }

  pub fn http_client(&mut self, http_client: reqwest::Client) -> &mut Self {
    self.http_client = Some(http_client);
    self
  }

  /// A product token appended to the default user agent.
  pub fn user_agent(&mut self, user_agent: String) -> &mut Self {
    self.user_agent = Some(user_agent);
    self
  }

  pub fn challenge_poll(&mut self, policy: PollPolicy) -> &mut Self {
    self.challenge_poll = policy;
    self
  }

  pub fn order_poll(&mut self, policy: PollPolicy) -> &mut Self {
    self.order_poll = policy;
    self
  }

  /// Upper bound on the whole of [`Session::get_certificate`].
  pub fn deadline(&mut self, deadline: Duration) -> &mut Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn fetch_mode(&mut self, fetch_mode: FetchMode) -> &mut Self {
    self.fetch_mode = fetch_mode;
    self
  }

  /// Fetches the directory and returns a session ready for registration.
  #[instrument(level = Level::INFO, name = "acme2_issuer::SessionBuilder::build", err, skip(self), fields(url = %self.url))]
  pub async fn build(&mut self) -> Result<Session, Error> {
    let transport = match &self.transport {
      Some(transport) => transport.clone(),
      None => {
        let http_client = self
          .http_client
          .clone()
          .unwrap_or_else(reqwest::Client::new);
        let mut transport = ReqwestTransport::new(http_client);
        if let Some(user_agent) = &self.user_agent {
          transport = transport.with_user_agent(user_agent);
        }
        Arc::new(transport)
      }
    };

    let directory = Directory::fetch(&*transport, &self.url).await?;
    debug!(
      terms_of_service = ?directory.terms_of_service(),
      "Fetched directory"
    );

    Ok(Session {
      nonce: Mutex::new(NonceManager::new(directory.new_nonce_url.clone())),
      transport,
      directory,
      config: SessionConfig {
        challenge_poll: self.challenge_poll,
        order_poll: self.order_poll,
        deadline: self.deadline,
        fetch_mode: self.fetch_mode,
      },
      account_url: None,
      order_url: None,
      finalize_url: None,
      authorization_urls: vec![],
      expires: None,
      certificate_url: None,
    })
  }
}

/// The state of one issuance attempt against one ACME server.
///
/// Locators are only written by `&mut self` operations. Signed requests
/// are serialized through the nonce lane, so at most one is in flight at
/// a time even while authorization flows run concurrently.
pub struct Session {
  pub(crate) transport: Arc<dyn Transport>,
  pub(crate) directory: Directory,
  pub(crate) nonce: Mutex<NonceManager>,
  pub(crate) config: SessionConfig,

  pub(crate) account_url: Option<String>,
  pub(crate) order_url: Option<String>,
  pub(crate) finalize_url: Option<String>,
  pub(crate) authorization_urls: Vec<String>,
  pub(crate) expires: Option<String>,
  pub(crate) certificate_url: Option<String>,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("directory", &self.directory)
      .field("account_url", &self.account_url)
      .field("order_url", &self.order_url)
      .field("finalize_url", &self.finalize_url)
      .field("certificate_url", &self.certificate_url)
      .finish_non_exhaustive()
  }
}

impl Session {
  pub fn directory(&self) -> &Directory {
    &self.directory
  }

  pub fn terms_of_service(&self) -> Option<&str> {
    self.directory.terms_of_service()
  }

  /// The account locator, used as `kid` once registration succeeded.
  pub fn account_url(&self) -> Option<&str> {
    self.account_url.as_deref()
  }

  pub fn order_url(&self) -> Option<&str> {
    self.order_url.as_deref()
  }

  pub fn finalize_url(&self) -> Option<&str> {
    self.finalize_url.as_deref()
  }

  pub fn authorization_urls(&self) -> &[String] {
    &self.authorization_urls
  }

  /// The expiry of the order the certificate was issued from.
  pub fn expires(&self) -> Option<&str> {
    self.expires.as_deref()
  }

  pub fn certificate_url(&self) -> Option<&str> {
    self.certificate_url.as_deref()
  }

  pub(crate) fn require_account_url(&self) -> Result<String, Error> {
    self
      .account_url
      .clone()
      .ok_or(Error::Config("no account has been registered in this session"))
  }

  /// Signs `payload` for `url` and submits it.
  ///
  /// The nonce lane is held from nonce fetch until the replacement nonce
  /// has been stored, so concurrent callers queue here.
  pub(crate) async fn signed_request(
    &self,
    url: &str,
    payload: &str,
    key: &PKey<Private>,
    kid: Option<String>,
  ) -> Result<HttpResponse, Error> {
    let mut nonces = self.nonce.lock().await;
    let nonce = nonces.fetch(&*self.transport).await?;
    let body = jws(url, Some(nonce), payload, key, kid)?;
    nonces.consume();
    debug!(url, "Submitting signed request");
    let resp = self
      .transport
      .request(HttpRequest::jose(url, serde_json::to_vec(&body)?))
      .await?;
    nonces.replace(&resp);
    drop(nonces);
    resp.error_for_status()
  }

  /// Reads back a resource the way [`FetchMode`] says.
  pub(crate) async fn fetch(
    &self,
    url: &str,
    key: &PKey<Private>,
  ) -> Result<HttpResponse, Error> {
    match self.config.fetch_mode {
      FetchMode::Get => {
        self
          .transport
          .request(HttpRequest::get(url))
          .await?
          .error_for_status()
      }
      FetchMode::PostAsGet => {
        let kid = self.require_account_url()?;
        self.signed_request(url, "", key, Some(kid)).await
      }
    }
  }
}
