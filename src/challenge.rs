use crate::authorization::Challenge;
use crate::authorization::ChallengeStatus;
use crate::error::*;
use crate::helpers::*;
use crate::hooks::ChallengeHook;
use crate::jws::thumbprint;
use crate::session::Session;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use tracing::debug;
use tracing::field;
use tracing::instrument;
use tracing::warn;
use tracing::Level;
use tracing::Span;

/// Path prefix under which HTTP-01 proofs are served.
pub const HTTP_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Label prepended to the hostname for DNS-01 TXT records.
pub const DNS_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Everything a [`ChallengeHook`] needs to publish a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDescriptor {
  pub identifier: Identifier,
  pub hostname: String,
  pub r#type: String,
  pub token: String,
  pub thumbprint: String,
  /// The HTTP-01 response body.
  pub key_authorization: String,
  /// The DNS-01 TXT record value.
  pub dns_authorization: String,
}

impl ChallengeDescriptor {
  pub fn new(
    identifier: Identifier,
    r#type: &str,
    token: &str,
    thumbprint: &str,
  ) -> Result<Self, Error> {
    let key_authorization = key_authorization(token, thumbprint);
    let dns_authorization = dns_authorization(&key_authorization)?;
    Ok(ChallengeDescriptor {
      hostname: identifier.value.clone(),
      identifier,
      r#type: r#type.to_string(),
      token: token.to_string(),
      thumbprint: thumbprint.to_string(),
      key_authorization,
      dns_authorization,
    })
  }

  pub fn http_path(&self) -> String {
    format!("{}{}", HTTP_CHALLENGE_PREFIX, self.token)
  }

  pub fn dns_record_name(&self) -> String {
    format!("{}.{}", DNS_CHALLENGE_LABEL, self.hostname)
  }
}

/// `token "." thumbprint`
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
  format!("{}.{}", token, thumbprint)
}

/// base64url(SHA-256(key authorization))
pub fn dns_authorization(key_authorization: &str) -> Result<String, Error> {
  sha256_b64(key_authorization.as_bytes())
}

impl Session {
  /// Publishes the proof through `hook`, tells the server to validate, and
  /// polls the challenge until the server is done with it.
  #[instrument(level = Level::INFO, name = "acme2_issuer::Session::respond_to_challenge", err, skip(self, challenge, key, hook), fields(identifier = %identifier.value, challenge_type = %challenge.r#type, status = field::Empty))]
  pub(crate) async fn respond_to_challenge(
    &self,
    identifier: &Identifier,
    challenge: &Challenge,
    key: &PKey<Private>,
    hook: &dyn ChallengeHook,
  ) -> Result<Challenge, Error> {
    let token = challenge
      .token
      .as_deref()
      .ok_or_else(|| transport_err("challenge must carry a token"))?;
    let kid = self.require_account_url()?;
    let descriptor = ChallengeDescriptor::new(
      identifier.clone(),
      &challenge.r#type,
      token,
      &thumbprint(key)?,
    )?;

    hook.set_challenge(&descriptor).await.map_err(Error::Hook)?;
    debug!("Challenge published");

    self
      .signed_request(&challenge.url, "{}", key, Some(kid))
      .await?;

    let mut attempts = 0;
    let current = loop {
      self.config.challenge_poll.wait(&mut attempts).await?;
      let current: Challenge = self.fetch(&challenge.url, key).await?.json()?;
      match &current.status {
        Some(status) if status.is_in_progress() => {
          debug!(status = ?status, "Challenge not done");
        }
        _ => break current,
      }
    };
    Span::current().record("status", &field::debug(&current.status));

    let failure = match &current.status {
      Some(ChallengeStatus::Valid) => None,
      Some(ChallengeStatus::Invalid) => {
        Some(ChallengeFailure::Invalid(current.error.clone()))
      }
      Some(status) => {
        Some(ChallengeFailure::Unrecognized(status.as_str().to_string()))
      }
      None => Some(ChallengeFailure::MissingStatus),
    };
    if let Some(failure) = failure {
      return Err(Error::BadChallengeState {
        identifier: identifier.value.clone(),
        failure,
      });
    }

    if let Err(err) = hook.remove_challenge(&descriptor).await {
      warn!(error = %err, "Failed to remove challenge, continuing");
    }

    Ok(current)
  }
}
