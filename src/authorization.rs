use crate::error::*;
use crate::helpers::Identifier;
use crate::session::Session;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::Deserialize;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

/// The status of this authorization. Possible values are "pending",
/// "valid", "invalid", "deactivated", "expired", and "revoked". Other values
/// are kept verbatim.
#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(from = "String")]
pub enum AuthorizationStatus {
  Pending,
  Valid,
  Invalid,
  Deactivated,
  Expired,
  Revoked,
  Unknown(String),
}

impl From<String> for AuthorizationStatus {
  fn from(status: String) -> Self {
    match status.as_str() {
      "pending" => AuthorizationStatus::Pending,
      "valid" => AuthorizationStatus::Valid,
      "invalid" => AuthorizationStatus::Invalid,
      "deactivated" => AuthorizationStatus::Deactivated,
      "expired" => AuthorizationStatus::Expired,
      "revoked" => AuthorizationStatus::Revoked,
      _ => AuthorizationStatus::Unknown(status),
    }
  }
}

impl AuthorizationStatus {
  pub fn as_str(&self) -> &str {
    match self {
      AuthorizationStatus::Pending => "pending",
      AuthorizationStatus::Valid => "valid",
      AuthorizationStatus::Invalid => "invalid",
      AuthorizationStatus::Deactivated => "deactivated",
      AuthorizationStatus::Expired => "expired",
      AuthorizationStatus::Revoked => "revoked",
      AuthorizationStatus::Unknown(status) => status,
    }
  }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME authorization object represents a server's authorization
/// for an account to represent an identifier.
pub struct Authorization {
  #[serde(skip)]
  pub url: String,

  /// The identifier that the account is authorized to represent.
  pub identifier: Identifier,
  /// The status of this authorization.
  pub status: AuthorizationStatus,
  /// The timestamp after which the server will consider this
  /// authorization invalid.
  pub expires: Option<String>,
  /// For pending authorizations, the challenges that the client can
  /// fulfill in order to prove possession of the identifier. For
  /// valid authorizations, the challenge that was validated. For
  /// invalid authorizations, the challenge that was attempted and
  /// failed.
  pub challenges: Vec<Challenge>,
  pub wildcard: Option<bool>,
}

/// The status of a challenge. Values this client does not know are kept
/// verbatim for diagnostics.
#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(from = "String")]
pub enum ChallengeStatus {
  Pending,
  Processing,
  Valid,
  Invalid,
  Unknown(String),
}

impl From<String> for ChallengeStatus {
  fn from(status: String) -> Self {
    match status.as_str() {
      "pending" => ChallengeStatus::Pending,
      "processing" => ChallengeStatus::Processing,
      "valid" => ChallengeStatus::Valid,
      "invalid" => ChallengeStatus::Invalid,
      _ => ChallengeStatus::Unknown(status),
    }
  }
}

impl ChallengeStatus {
  pub fn as_str(&self) -> &str {
    match self {
      ChallengeStatus::Pending => "pending",
      ChallengeStatus::Processing => "processing",
      ChallengeStatus::Valid => "valid",
      ChallengeStatus::Invalid => "invalid",
      ChallengeStatus::Unknown(status) => status,
    }
  }

  /// Whether the server is still working on the challenge.
  pub fn is_in_progress(&self) -> bool {
    matches!(self, ChallengeStatus::Pending | ChallengeStatus::Processing)
  }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  /// The type of challenge encoded in the object.
  pub r#type: String,
  /// The URL to which a response can be posted.
  pub url: String,
  /// The status of this challenge. Absent if the server left it out.
  #[serde(default)]
  pub status: Option<ChallengeStatus>,
  /// The time at which the server validated this challenge.
  pub validated: Option<String>,

  /// Error that occurred while the server was validating the
  /// challenge, if any.
  pub error: Option<ServerError>,

  /// A random value that uniquely identifies the challenge.
  pub token: Option<String>,
}

impl Authorization {
  pub fn get_challenge(&self, r#type: &str) -> Option<&Challenge> {
    self
      .challenges
      .iter()
      .find(|challenge| challenge.r#type == r#type)
  }

  /// Picks the first of `requested` (in the caller's order of preference)
  /// that the server offers for this authorization.
  pub fn select_challenge(
    &self,
    requested: &[String],
  ) -> Result<&Challenge, Error> {
    requested
      .iter()
      .find_map(|r#type| self.get_challenge(r#type))
      .ok_or_else(|| Error::UnsupportedChallenge {
        identifier: self.identifier.value.clone(),
        offered: self
          .challenges
          .iter()
          .map(|challenge| challenge.r#type.clone())
          .collect(),
      })
  }
}

impl Session {
  #[instrument(level = Level::DEBUG, name = "acme2_issuer::Session::fetch_authorization", err, skip(self, key), fields(status = field::Empty))]
  pub(crate) async fn fetch_authorization(
    &self,
    url: &str,
    key: &PKey<Private>,
  ) -> Result<Authorization, Error> {
    let mut authorization: Authorization = self.fetch(url, key).await?.json()?;
    authorization.url = url.to_string();
    Span::current().record("status", &field::debug(&authorization.status));
    Ok(authorization)
  }
}
