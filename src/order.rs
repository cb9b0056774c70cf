use crate::authorization::AuthorizationStatus;
use crate::error::*;
use crate::helpers::*;
use crate::hooks::ChallengeHook;
use crate::session::Session;
use futures_util::future::try_join_all;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use openssl::x509::X509Req;
use openssl::x509::X509;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use tracing::field;
use tracing::info_span;
use tracing::instrument;
use tracing::Level;
use tracing::Span;
use tracing_futures::Instrument;

#[derive(Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The status of this order.  Possible values are "pending", "ready",
/// processing", "valid", and "invalid".
pub enum OrderStatus {
  Pending,
  Ready,
  Processing,
  Valid,
  Invalid,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME order object represents a client's request for a certificate
/// and is used to track the progress of that order through to issuance.
pub struct Order {
  /// The order locator.
  #[serde(skip)]
  pub url: String,

  /// The status of this order.
  pub status: Option<OrderStatus>,
  /// The timestamp after which the server will consider this order
  /// invalid.
  pub expires: Option<String>,
  /// An array of identifier objects that the order pertains to.
  pub identifiers: Vec<Identifier>,
  /// The requested value of the notBefore field in the certificate.
  pub not_before: Option<String>,
  /// The requested value of the notAfter field in the certificate.
  pub not_after: Option<String>,

  /// The error that occurred while processing the order, if any.
  pub error: Option<ServerError>,

  #[serde(rename = "authorizations")]
  /// For pending orders, the authorizations that the client needs to
  /// complete before the requested certificate can be issued. For
  /// final orders (in the "valid" or "invalid" state), the
  /// authorizations that were completed.
  pub authorization_urls: Vec<String>,
  #[serde(rename = "finalize")]
  /// A URL that a CSR must be POSTed to once all of the order's
  /// authorizations are satisfied to finalize the order.
  pub finalize_url: String,
  #[serde(rename = "certificate")]
  /// A URL for the certificate that has been issued in response to
  /// this order.
  pub certificate_url: Option<String>,
}

/// What a certificate is requested for, and how its challenges are met.
#[derive(Clone)]
pub struct CertificateOptions {
  /// The key the account was registered with.
  pub account_key: PKey<Private>,
  /// The key the certificate is issued for.
  pub domain_key: PKey<Private>,
  pub domains: Vec<String>,
  /// Challenge types the hook can fulfil, most preferred first.
  pub challenge_types: Vec<String>,
  pub challenge_hook: Arc<dyn ChallengeHook>,
}

impl CertificateOptions {
  pub fn new(
    account_key: PKey<Private>,
    domain_key: PKey<Private>,
    domains: Vec<String>,
    challenge_hook: Arc<dyn ChallengeHook>,
  ) -> Self {
    CertificateOptions {
      account_key,
      domain_key,
      domains,
      challenge_types: vec![],
      challenge_hook,
    }
  }

  pub fn challenge_types(mut self, challenge_types: Vec<String>) -> Self {
    self.challenge_types = challenge_types;
    self
  }

  pub fn challenge_type(mut self, challenge_type: &str) -> Self {
    self.challenge_types = vec![challenge_type.to_string()];
    self
  }
}

/// An issued certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
  /// The download response body, as the server sent it.
  pub certificate: String,
  pub certificate_url: String,
  /// Expiry of the order the certificate was issued from.
  pub expires: Option<String>,
}

impl Certificate {
  /// Parses the PEM chain, leaf first.
  pub fn chain(&self) -> Result<Vec<X509>, Error> {
    Ok(X509::stack_from_pem(self.certificate.as_bytes())?)
  }
}

pub(crate) fn gen_csr(
  pkey: &PKey<Private>,
  domains: &[String],
) -> Result<X509Req, Error> {
  if domains.is_empty() {
    return Err(Error::Config("You need to supply at least one domain name"));
  }

  let mut builder = X509Req::builder()?;
  let name = {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", &domains[0])?;
    name.build()
  };
  builder.set_subject_name(&name)?;

  // Add all domains as SANs
  let san_extension = {
    let mut san = SubjectAlternativeName::new();
    for domain in domains.iter() {
      san.dns(domain);
    }
    san.build(&builder.x509v3_context(None))?
  };
  let mut stack = Stack::new()?;
  stack.push(san_extension)?;
  builder.add_extensions(&stack)?;

  builder.set_pubkey(pkey)?;
  builder.sign(pkey, MessageDigest::sha256())?;

  Ok(builder.build())
}

impl Session {
  /// Creates an order for `options.domains` and satisfies every one of its
  /// authorizations concurrently. The first failing authorization fails
  /// the order; the flows still running are dropped.
  #[instrument(level = Level::INFO, name = "acme2_issuer::Session::create_order", err, skip(self, options), fields(domains = ?options.domains, challenge_types = ?options.challenge_types, order_url = field::Empty))]
  pub async fn create_order(
    &mut self,
    options: &CertificateOptions,
  ) -> Result<Order, Error> {
    if options.challenge_types.is_empty() {
      return Err(Error::Config("challenge type must be specified"));
    }
    if options.domains.is_empty() {
      return Err(Error::Config("You need to supply at least one domain name"));
    }
    let kid = self.require_account_url()?;

    let identifiers: Vec<Identifier> = options
      .domains
      .iter()
      .map(|domain| Identifier::dns(domain.as_str()))
      .collect();
    let payload = json!({ "identifiers": identifiers }).to_string();

    let resp = self
      .signed_request(
        &self.directory.new_order_url,
        &payload,
        &options.account_key,
        Some(kid),
      )
      .await?;

    let order_url =
      resp.location("mandatory location header in newOrder not present")?;
    Span::current().record("order_url", &field::display(&order_url));

    let mut order: Order = resp.json()?;
    order.url = order_url.clone();
    self.order_url = Some(order_url);
    self.finalize_url = Some(order.finalize_url.clone());
    self.authorization_urls = order.authorization_urls.clone();

    let session: &Session = self;
    let flows = order.authorization_urls.iter().map(|url| {
      session
        .authorize(url, options)
        .instrument(info_span!("acme2_issuer::authorization", url = %url))
    });
    try_join_all(flows).await?;

    Ok(order)
  }

  async fn authorize(
    &self,
    url: &str,
    options: &CertificateOptions,
  ) -> Result<(), Error> {
    let authorization =
      self.fetch_authorization(url, &options.account_key).await?;
    match &authorization.status {
      AuthorizationStatus::Pending => {}
      AuthorizationStatus::Valid => {
        debug!(
          identifier = %authorization.identifier.value,
          "Authorization already valid"
        );
        return Ok(());
      }
      status => {
        return Err(Error::BadChallengeState {
          identifier: authorization.identifier.value.clone(),
          failure: ChallengeFailure::Authorization(status.as_str().to_string()),
        });
      }
    }

    let challenge = authorization.select_challenge(&options.challenge_types)?;
    self
      .respond_to_challenge(
        &authorization.identifier,
        challenge,
        &options.account_key,
        &*options.challenge_hook,
      )
      .await?;
    Ok(())
  }

  /// Submits a CSR for `validated_domains`, waits for issuance, and
  /// downloads the certificate.
  #[instrument(level = Level::INFO, name = "acme2_issuer::Session::finalize", err, skip(self, options), fields(order_url = ?self.order_url, status = field::Empty))]
  pub async fn finalize(
    &mut self,
    options: &CertificateOptions,
    validated_domains: &[String],
  ) -> Result<Certificate, Error> {
    let kid = self.require_account_url()?;
    let (order_url, finalize_url) =
      match (self.order_url.clone(), self.finalize_url.clone()) {
        (Some(order_url), Some(finalize_url)) => (order_url, finalize_url),
        _ => {
          return Err(Error::Config("no order has been created in this session"))
        }
      };

    let csr = gen_csr(&options.domain_key, validated_domains)?;
    let payload = json!({ "csr": b64(&csr.to_der()?) }).to_string();

    let resp = self
      .signed_request(&finalize_url, &payload, &options.account_key, Some(kid))
      .await?;
    let mut order: Order = resp.json()?;

    let mut attempts = 0;
    while order.status == Some(OrderStatus::Processing) {
      self.config.order_poll.wait(&mut attempts).await?;
      order = self.fetch(&order_url, &options.account_key).await?.json()?;
    }
    Span::current().record("status", &field::debug(&order.status));

    if order.status != Some(OrderStatus::Valid) {
      return Err(Error::FinalizeFailed {
        status: order.status,
        error: order.error,
      });
    }

    let certificate_url = order
      .certificate_url
      .ok_or_else(|| transport_err("a valid order must have a certificate URL"))?;
    self.expires = order.expires.clone();
    self.certificate_url = Some(certificate_url.clone());

    let resp = self.fetch(&certificate_url, &options.account_key).await?;
    let certificate = map_transport_err(String::from_utf8(resp.body))?;

    Ok(Certificate {
      certificate,
      certificate_url,
      expires: order.expires,
    })
  }

  /// Runs the whole issuance: order creation, every challenge, finalize,
  /// and download. Bounded by the session deadline when one is set.
  #[instrument(level = Level::INFO, name = "acme2_issuer::Session::get_certificate", err, skip(self, options), fields(domains = ?options.domains))]
  pub async fn get_certificate(
    &mut self,
    options: &CertificateOptions,
  ) -> Result<Certificate, Error> {
    match self.config.deadline {
      Some(deadline) => tokio::time::timeout(deadline, self.issue(options))
        .await
        .map_err(|_| Error::DeadlineExceeded(deadline))?,
      None => self.issue(options).await,
    }
  }

  async fn issue(
    &mut self,
    options: &CertificateOptions,
  ) -> Result<Certificate, Error> {
    self.create_order(options).await?;
    self.finalize(options, &options.domains).await
  }
}
