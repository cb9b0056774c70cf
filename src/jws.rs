use crate::error::*;
use crate::helpers::*;
use openssl::bn::BigNum;
use openssl::bn::BigNumContext;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::sign::Signer;
use serde::Deserialize;
use serde::Serialize;

#[derive(Serialize, Clone, Default)]
struct JwsHeader {
  alg: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  nonce: Option<String>,
  url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  kid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  jwk: Option<Jwk>,
}

/// The public half of an account key. Members are declared in lexical
/// order, so the serialized form is the RFC 7638 thumbprint input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Jwk {
  Rsa { e: String, kty: String, n: String },
  Ec {
    crv: String,
    kty: String,
    x: String,
    y: String,
  },
}

impl Jwk {
  pub fn new(pkey: &PKey<Private>) -> Result<Jwk, Error> {
    match pkey.id() {
      Id::RSA => {
        let rsa = pkey.rsa()?;
        Ok(Jwk::Rsa {
          e: b64(&rsa.e().to_vec()),
          kty: "RSA".to_string(),
          n: b64(&rsa.n().to_vec()),
        })
      }
      Id::EC => {
        let ec = pkey.ec_key()?;
        let group = ec.group();
        if group.curve_name() != Some(Nid::X9_62_PRIME256V1) {
          return Err(Error::Config("only P-256 EC keys are supported"));
        }
        let mut ctx = BigNumContext::new()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        ec.public_key()
          .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;
        Ok(Jwk::Ec {
          crv: "P-256".to_string(),
          kty: "EC".to_string(),
          x: b64(&x.to_vec_padded(32)?),
          y: b64(&y.to_vec_padded(32)?),
        })
      }
      _ => Err(Error::Config("account keys must be RSA or P-256 EC keys")),
    }
  }

  /// base64url(SHA-256(canonical JWK)).
  pub fn thumbprint(&self) -> Result<String, Error> {
    sha256_b64(&serde_json::to_vec(self)?)
  }
}

/// Thumbprint of the public half of `pkey`.
pub fn thumbprint(pkey: &PKey<Private>) -> Result<String, Error> {
  Jwk::new(pkey)?.thumbprint()
}

/// A JWS in flattened JSON serialization.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Jws {
  pub protected: String,
  pub payload: String,
  pub signature: String,
}

fn alg(pkey: &PKey<Private>) -> Result<&'static str, Error> {
  match pkey.id() {
    Id::RSA => Ok("RS256"),
    Id::EC => Ok("ES256"),
    Id::HMAC => Ok("HS256"),
    _ => Err(Error::Config("unsupported signing key type")),
  }
}

fn sign(pkey: &PKey<Private>, message: &[u8]) -> Result<Vec<u8>, Error> {
  if pkey.id() == Id::EC {
    // JWS wants the raw r || s form, not DER.
    let digest = hash(MessageDigest::sha256(), message)?;
    let sig = EcdsaSig::sign(&digest, &*pkey.ec_key()?)?;
    let mut raw = sig.r().to_vec_padded(32)?;
    raw.extend(sig.s().to_vec_padded(32)?);
    return Ok(raw);
  }
  let mut signer = Signer::new(MessageDigest::sha256(), pkey)?;
  signer.update(message)?;
  Ok(signer.sign_to_vec()?)
}

/// Builds a signed envelope for `payload` directed at `url`.
///
/// With an `account_id` the header carries it as `kid`; without one the
/// public key is embedded as `jwk`, which only new-account requests may do.
/// An empty `payload` produces an empty payload segment (POST-as-GET).
pub(crate) fn jws(
  url: &str,
  nonce: Option<String>,
  payload: &str,
  pkey: &PKey<Private>,
  account_id: Option<String>,
) -> Result<Jws, Error> {
  let payload_b64 = b64(payload.as_bytes());

  let mut header = JwsHeader {
    nonce,
    alg: alg(pkey)?,
    url: url.to_string(),
    ..Default::default()
  };

  if let Some(kid) = account_id {
    header.kid = Some(kid);
  } else {
    header.jwk = Some(Jwk::new(pkey)?);
  }

  let protected_b64 = b64(&serde_json::to_vec(&header)?);

  let signature_b64 = b64(&sign(
    pkey,
    format!("{}.{}", protected_b64, payload_b64).as_bytes(),
  )?);

  Ok(Jws {
    protected: protected_b64,
    payload: payload_b64,
    signature: signature_b64,
  })
}

/// The inner envelope of an external account binding: the account's JWK,
/// MAC-signed with the CA-issued key, without a nonce.
pub(crate) fn eab_jws(
  url: &str,
  account_key: &PKey<Private>,
  key_id: &str,
  hmac_key: &PKey<Private>,
) -> Result<Jws, Error> {
  let payload = serde_json::to_string(&Jwk::new(account_key)?)?;
  jws(url, None, &payload, hmac_key, Some(key_id.to_string()))
}
