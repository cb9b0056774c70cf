use crate::error::*;
use crate::transport::HttpRequest;
use crate::transport::HttpResponse;
use crate::transport::Transport;
use tracing::debug;
use tracing::trace;

pub(crate) const REPLAY_NONCE: &str = "replay-nonce";

/// Owns the single anti-replay token of a session.
///
/// Every signed submission fetches the current nonce, consumes it, and
/// replaces it from the response before the next signed request goes out.
#[derive(Debug)]
pub(crate) struct NonceManager {
  new_nonce_url: String,
  current: Option<String>,
}

impl NonceManager {
  pub fn new(new_nonce_url: String) -> Self {
    NonceManager {
      new_nonce_url,
      current: None,
    }
  }

  /// The held nonce, or a fresh one from the newNonce endpoint. Failures
  /// are not retried here.
  pub async fn fetch(
    &mut self,
    transport: &dyn Transport,
  ) -> Result<String, Error> {
    if let Some(nonce) = &self.current {
      trace!("Reusing held nonce");
      return Ok(nonce.clone());
    }

    debug!(url = %self.new_nonce_url, "Requesting new nonce");
    let resp = transport
      .request(HttpRequest::head(self.new_nonce_url.clone()))
      .await?
      .error_for_status()?;
    let nonce = resp
      .header(REPLAY_NONCE)
      .ok_or_else(|| transport_err("newNonce request must return a nonce"))?
      .to_string();
    self.current = Some(nonce.clone());
    Ok(nonce)
  }

  pub fn consume(&mut self) {
    self.current = None;
  }

  /// Stores the replacement nonce carried by `resp`, if any.
  pub fn replace(&mut self, resp: &HttpResponse) {
    if let Some(nonce) = resp.header(REPLAY_NONCE) {
      self.current = Some(nonce.to_string());
    }
  }

  #[cfg(test)]
  pub fn current(&self) -> Option<&str> {
    self.current.as_deref()
  }
}
