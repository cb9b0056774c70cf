use crate::error::*;
use crate::hooks::AgreementHook;
use crate::jws::eab_jws;
use crate::jws::Jws;
use crate::session::Session;
use data_encoding::BASE64URL_NOPAD;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

/// The status of an [`Account`].
///
/// Possible values are "valid", "deactivated",
/// and "revoked". The value "deactivated" should be used to indicate client-
/// initiated deactivation whereas "revoked" should be used to indicate server-
/// initiated deactivation.
#[derive(Deserialize, Eq, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
  Valid,
  Deactivated,
  Revoked,
}

/// Credentials issued by the CA that tie the new account to an existing
/// customer account.
#[derive(Debug, Clone)]
pub struct ExternalAccountBinding {
  /// Key identifier, in string form.
  key_id: String,

  /// HMAC private key.
  hmac_key: PKey<Private>,
}

impl ExternalAccountBinding {
  pub fn new(key_id: String, hmac_key: &[u8]) -> Result<Self, Error> {
    Ok(ExternalAccountBinding {
      key_id,
      hmac_key: PKey::hmac(hmac_key)?,
    })
  }

  /// For MAC keys handed out base64url-encoded, as most CAs do.
  pub fn from_base64url(key_id: String, hmac_key: &str) -> Result<Self, Error> {
    let hmac_key = BASE64URL_NOPAD
      .decode(hmac_key.trim_end_matches('=').as_bytes())
      .map_err(|_| Error::Config("EAB MAC key must be base64url encoded"))?;
    Self::new(key_id, &hmac_key)
  }

  pub fn key_id(&self) -> &str {
    &self.key_id
  }
}

/// What [`Session::register`] needs to create or look up an account.
#[derive(Clone)]
pub struct AccountOptions {
  /// Signs every request of the session. Not the certificate key.
  pub account_key: PKey<Private>,
  pub email: String,
  pub agreement: Arc<dyn AgreementHook>,
  pub external_account_binding: Option<ExternalAccountBinding>,
}

impl AccountOptions {
  pub fn new(
    account_key: PKey<Private>,
    email: String,
    agreement: Arc<dyn AgreementHook>,
  ) -> Self {
    AccountOptions {
      account_key,
      email,
      agreement,
      external_account_binding: None,
    }
  }

  pub fn external_account_binding(
    mut self,
    binding: ExternalAccountBinding,
  ) -> Self {
    self.external_account_binding = Some(binding);
    self
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAccount {
  terms_of_service_agreed: bool,
  only_return_existing: bool,
  contact: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  external_account_binding: Option<Jws>,
}

/// An ACME account. This is used to identify a subscriber to an ACME server.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Account {
  /// The account locator, used as `kid` for every later request.
  #[serde(skip)]
  pub url: String,

  /// The status of this account.
  pub status: AccountStatus,
  /// An array of URLs that the server can use to contact the client for
  /// issues related to this account.
  pub contact: Option<Vec<String>>,
  /// Including this field in a newAccount request, with a value of true,
  /// indicates the client's agreement with the terms of service.
  pub terms_of_service_agreed: Option<bool>,
  /// A URL from which a list of orders submitted by this account can be
  /// fetched.
  pub orders: Option<String>,
}

impl Session {
  /// Agrees to the terms of service and creates (or looks up) the account
  /// for `options.account_key`.
  ///
  /// On success the account locator is stored in the session and every
  /// later signed request identifies itself with it.
  #[instrument(level = Level::INFO, name = "acme2_issuer::Session::register", err, skip(self, options), fields(email = %options.email, eab = options.external_account_binding.is_some(), account_url = field::Empty))]
  pub async fn register(
    &mut self,
    options: &AccountOptions,
  ) -> Result<Account, Error> {
    self.nonce.lock().await.fetch(&*self.transport).await?;

    if let Some(tos) = self.directory.terms_of_service() {
      let agreed = options
        .agreement
        .agree_to_terms(tos)
        .await
        .map_err(Error::Hook)?;
      if agreed != tos {
        return Err(Error::AgreeTos {
          tos: tos.to_string(),
          agreed,
        });
      }
      debug!(tos, "Agreed to terms of service");
    }

    let url = self.directory.new_account_url.clone();

    let external_account_binding = match &options.external_account_binding {
      Some(binding) => Some(eab_jws(
        &url,
        &options.account_key,
        &binding.key_id,
        &binding.hmac_key,
      )?),
      None if self.directory.external_account_required() => {
        return Err(Error::Config(
          "the server requires an external account binding",
        ));
      }
      None => None,
    };

    let payload = serde_json::to_string(&NewAccount {
      terms_of_service_agreed: true,
      only_return_existing: false,
      contact: vec![format!("mailto:{}", options.email)],
      external_account_binding,
    })?;

    let resp = self
      .signed_request(&url, &payload, &options.account_key, None)
      .await?;

    let account_url =
      resp.location("mandatory location header in newAccount not present")?;
    Span::current().record("account_url", &field::display(&account_url));

    let mut account: Account = resp.json()?;
    account.url = account_url.clone();
    self.account_url = Some(account_url);
    Ok(account)
  }
}
