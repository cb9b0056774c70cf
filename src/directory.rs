use crate::error::*;
use crate::transport::HttpRequest;
use crate::transport::Transport;
use serde::Deserialize;

/// The server's published map of service endpoints.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
  #[serde(rename = "newNonce")]
  pub new_nonce_url: String,
  #[serde(rename = "newAccount")]
  pub new_account_url: String,
  #[serde(rename = "newOrder")]
  pub new_order_url: String,
  #[serde(rename = "revokeCert")]
  pub revoke_cert_url: Option<String>,
  #[serde(rename = "keyChange")]
  pub key_change_url: Option<String>,
  #[serde(rename = "newAuthz")]
  pub new_authz_url: Option<String>,
  pub meta: Option<DirectoryMeta>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
  pub terms_of_service: Option<String>,
  pub website: Option<String>,
  pub caa_identities: Option<Vec<String>>,
  pub external_account_required: Option<bool>,
}

impl Directory {
  pub(crate) async fn fetch(
    transport: &dyn Transport,
    url: &str,
  ) -> Result<Directory, Error> {
    let resp = transport
      .request(HttpRequest::get(url))
      .await?
      .error_for_status()?;
    resp.json()
  }

  pub fn terms_of_service(&self) -> Option<&str> {
    self.meta.as_ref()?.terms_of_service.as_deref()
  }

  pub fn external_account_required(&self) -> bool {
    self
      .meta
      .as_ref()
      .and_then(|meta| meta.external_account_required)
      .unwrap_or(false)
  }
}
