use crate::error::Error;
use data_encoding::BASE64URL_NOPAD;
use openssl::ec::EcGroup;
use openssl::ec::EcKey;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use serde::Deserialize;
use serde::Serialize;

/// This is a identifier for a resource that the ACME server
/// can provision certificates for (a domain).
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
  /// The type of identifier.
  pub r#type: String,
  /// The identifier itself.
  pub value: String,
}

impl Identifier {
  /// A `dns` identifier for the given hostname.
  pub fn dns(hostname: impl Into<String>) -> Self {
    Identifier {
      r#type: "dns".to_string(),
      value: hostname.into(),
    }
  }
}

pub(crate) fn b64(data: &[u8]) -> String {
  BASE64URL_NOPAD.encode(data)
}

pub(crate) fn sha256_b64(data: &[u8]) -> Result<String, Error> {
  Ok(b64(&hash(MessageDigest::sha256(), data)?))
}

/// Generate a new RSA private key using the specified size,
/// using the system random.
pub fn gen_rsa_private_key(bits: u32) -> Result<PKey<Private>, Error> {
  let rsa = Rsa::generate(bits)?;
  let key = PKey::from_rsa(rsa)?;
  Ok(key)
}

/// Generate a new P-256 private key, using the system random.
pub fn gen_ec_p256_private_key() -> Result<PKey<Private>, Error> {
  let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
  let ec = EcKey::generate(&group)?;
  let key = PKey::from_ec_key(ec)?;
  Ok(key)
}
