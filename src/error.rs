use crate::hooks::HookError;
use crate::order::OrderStatus;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The agreement hook did not agree to the exact terms of service URL
  /// published in the directory.
  #[error("you must agree to the terms of service at '{tos}' (agreed to '{agreed}')")]
  AgreeTos { tos: String, agreed: String },

  #[error("configuration error: {0}")]
  Config(&'static str),

  #[error("server didn't offer any challenge we can handle for {identifier} (offered: {offered:?})")]
  UnsupportedChallenge {
    identifier: String,
    offered: Vec<String>,
  },

  #[error("bad challenge state for {identifier}: {failure}")]
  BadChallengeState {
    identifier: String,
    failure: ChallengeFailure,
  },

  #[error("cannot finalize order (status: {status:?}){}", problem_suffix(.error))]
  FinalizeFailed {
    status: Option<OrderStatus>,
    error: Option<ServerError>,
  },

  #[error("the maximum poll attempts have been exceeded")]
  MaxAttemptsExceeded,

  #[error("the issuance deadline of {0:?} has been exceeded")]
  DeadlineExceeded(Duration),

  #[error("hook failed: {0}")]
  Hook(#[source] HookError),

  #[error(transparent)]
  Server(#[from] ServerError),

  #[error(transparent)]
  Transport(Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// A stable code for the kind of this error.
  pub fn code(&self) -> &'static str {
    match self {
      Error::AgreeTos { .. } => "E_AGREE_TOS",
      Error::Config(_) => "E_CONFIG",
      Error::UnsupportedChallenge { .. } => "E_UNSUPPORTED_CHALLENGE",
      Error::BadChallengeState { .. } => "E_BAD_CHALLENGE_STATE",
      Error::FinalizeFailed { .. } => "E_FINALIZE_FAILED",
      Error::MaxAttemptsExceeded => "E_MAX_ATTEMPTS",
      Error::DeadlineExceeded(_) => "E_DEADLINE",
      Error::Hook(_) => "E_HOOK",
      Error::Server(_) => "E_SERVER",
      Error::Transport(_) => "E_TRANSPORT",
      Error::Other(_) => "E_OTHER",
    }
  }
}

/// Why a challenge did not end up `valid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeFailure {
  /// The server response carried no status at all.
  MissingStatus,
  /// The server marked the challenge `invalid`.
  Invalid(Option<ServerError>),
  /// The server returned a status this client does not know.
  Unrecognized(String),
  /// The authorization was neither pending nor valid when fetched.
  Authorization(String),
}

impl fmt::Display for ChallengeFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChallengeFailure::MissingStatus => write!(f, "status missing"),
      ChallengeFailure::Invalid(Some(err)) => write!(f, "invalid: {}", err),
      ChallengeFailure::Invalid(None) => write!(f, "invalid"),
      ChallengeFailure::Unrecognized(status) => {
        write!(f, "unrecognized status '{}'", status)
      }
      ChallengeFailure::Authorization(status) => {
        write!(f, "authorization is '{}'", status)
      }
    }
  }
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(&'static str);

pub fn transport_err(msg: &'static str) -> Error {
  Error::Transport(Box::new(TransportError(msg)))
}

pub fn map_transport_err<T, E: std::error::Error + Send + Sync + 'static>(
  res: Result<T, E>,
) -> Result<T, Error> {
  res.map_err(|err| Error::Transport(Box::new(err)))
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    Self::Transport(Box::new(err))
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Self::Transport(Box::new(err))
  }
}

impl From<openssl::error::ErrorStack> for Error {
  fn from(err: openssl::error::ErrorStack) -> Self {
    Self::Other(Box::new(err))
  }
}

/// This is an error as returned by the ACME server (an RFC 7807 problem
/// document).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
  /// The type of this error.
  pub r#type: Option<String>,
  /// The human readable title of this error.
  pub title: Option<String>,
  /// The status code of this error.
  pub status: Option<u16>,
  /// The human readable extra description for this error.
  pub detail: Option<String>,
}

impl std::error::Error for ServerError {}

impl fmt::Display for ServerError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "ServerError({}): {}: {}",
      self.r#type.as_deref().unwrap_or_default(),
      self.title.as_deref().unwrap_or_default(),
      self.detail.as_deref().unwrap_or_default()
    )
  }
}

fn problem_suffix(error: &Option<ServerError>) -> String {
  match error {
    Some(err) => format!(": {}", err),
    None => String::new(),
  }
}

impl ServerError {
  /// Builds an error for a non-success response whose body is not a
  /// problem document.
  pub(crate) fn from_status(status: u16, body: &[u8]) -> Self {
    ServerError {
      r#type: None,
      title: Some(format!("HTTP {}", status)),
      status: Some(status),
      detail: Some(String::from_utf8_lossy(body).into_owned()),
    }
  }
}
