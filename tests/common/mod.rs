#![allow(dead_code)]


use acme2_issuer::*;
use mock_acme::MockAcme;
use mock_acme::DIRECTORY_URL;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use std::sync::Arc;
use std::time::Duration;

pub fn fast_poll() -> PollPolicy {
  PollPolicy::new(Duration::from_millis(10), 50)
}

pub async fn session(mock: &Arc<MockAcme>) -> anyhow::Result<Session> {
  session_with(mock, |_| {}).await
}

pub async fn session_with(
  mock: &Arc<MockAcme>,
  configure: impl FnOnce(&mut SessionBuilder),
) -> anyhow::Result<Session> {
  let mut builder = SessionBuilder::new(DIRECTORY_URL.to_string());
  builder
    .transport(mock.clone())
    .challenge_poll(fast_poll())
    .order_poll(fast_poll());
  configure(&mut builder);
  Ok(builder.build().await?)
}

pub fn account_options(account_key: &PKey<Private>) -> AccountOptions {
  AccountOptions::new(
    account_key.clone(),
    "admin@example.com".to_string(),
    Arc::new(AcceptTerms),
  )
}

/// A session with a registered account, plus that account's key.
pub async fn registered(
  mock: &Arc<MockAcme>,
) -> anyhow::Result<(Session, PKey<Private>)> {
  let account_key = gen_ec_p256_private_key()?;
  let mut session = session(mock).await?;
  session.register(&account_options(&account_key)).await?;
  Ok((session, account_key))
}

pub fn certificate_options(
  account_key: &PKey<Private>,
  domains: &[&str],
  hook: Arc<dyn ChallengeHook>,
) -> anyhow::Result<CertificateOptions> {
  Ok(
    CertificateOptions::new(
      account_key.clone(),
      gen_ec_p256_private_key()?,
      domains.iter().map(|domain| domain.to_string()).collect(),
      hook,
    )
    .challenge_type("http-01"),
  )
}
