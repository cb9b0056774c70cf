use acme2_issuer::*;
use std::path::PathBuf;
use std::sync::Arc;

const LETS_ENCRYPT_STAGING_URL: &str =
  "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Usage: issue <domain> <email> <webroot> [directory-url]
///
/// `webroot` must be the document root a web server serves `<domain>` from
/// on port 80.
#[tokio::main]
async fn main() -> Result<(), Error> {
  let mut args = std::env::args().skip(1);
  let (domain, email, webroot) = match (args.next(), args.next(), args.next())
  {
    (Some(domain), Some(email), Some(webroot)) => {
      (domain, email, PathBuf::from(webroot))
    }
    _ => {
      eprintln!("usage: issue <domain> <email> <webroot> [directory-url]");
      std::process::exit(2);
    }
  };
  let directory_url = args
    .next()
    .unwrap_or_else(|| LETS_ENCRYPT_STAGING_URL.to_string());

  // Initialize the session against the ACME server's directory. Public CAs
  // only serve orders, authorizations and certificates to signed reads.
  let mut session = SessionBuilder::new(directory_url)
    .user_agent("acme2-issuer-demo/0.1".to_string())
    .fetch_mode(FetchMode::PostAsGet)
    .build()
    .await?;

  // For production purposes, you should keep the account key, so you can
  // renew your certificate with the same account.
  let account_key = gen_ec_p256_private_key()?;
  session
    .register(&AccountOptions::new(
      account_key.clone(),
      email,
      Arc::new(AcceptTerms),
    ))
    .await?;

  // Serve the key authorization from the webroot while the server
  // validates, and delete it afterwards.
  let set_root = webroot.clone();
  let remove_root = webroot;
  let hook = challenge_fn(
    move |challenge: ChallengeDescriptor| {
      let path = set_root.join(challenge.http_path().trim_start_matches('/'));
      async move {
        if let Some(dir) = path.parent() {
          tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&path, challenge.key_authorization).await?;
        Ok::<(), HookError>(())
      }
    },
    move |challenge: ChallengeDescriptor| {
      let path = remove_root.join(challenge.http_path().trim_start_matches('/'));
      async move {
        tokio::fs::remove_file(&path).await?;
        Ok::<(), HookError>(())
      }
    },
  );

  let options = CertificateOptions::new(
    account_key,
    gen_rsa_private_key(4096)?,
    vec![domain],
    Arc::new(hook),
  )
  .challenge_type("http-01");

  let certificate = session.get_certificate(&options).await?;
  println!("{}", certificate.certificate);

  Ok(())
}
