//! An ACME v2 client that drives a whole certificate issuance: directory
//! discovery, account registration, order creation, concurrent challenge
//! completion through caller-supplied hooks, finalization, and download.
//!
//! Resource reads are plain GETs unless [`FetchMode::PostAsGet`] is set.
//! Public CAs such as Let's Encrypt require POST-as-GET.
//!
//! ```no_run
//! use acme2_issuer::*;
//! use std::sync::Arc;
//!
//! # async fn run(hook: Arc<dyn ChallengeHook>) -> Result<(), Error> {
//! let mut session = SessionBuilder::new(
//!   "https://acme-staging-v02.api.letsencrypt.org/directory".to_string(),
//! )
//! .fetch_mode(FetchMode::PostAsGet)
//! .build()
//! .await?;
//!
//! let account_key = gen_ec_p256_private_key()?;
//! session
//!   .register(&AccountOptions::new(
//!     account_key.clone(),
//!     "admin@example.com".to_string(),
//!     Arc::new(AcceptTerms),
//!   ))
//!   .await?;
//!
//! let options = CertificateOptions::new(
//!   account_key,
//!   gen_rsa_private_key(2048)?,
//!   vec!["example.com".to_string()],
//!   hook,
//! )
//! .challenge_type("http-01");
//! let certificate = session.get_certificate(&options).await?;
//! println!("{}", certificate.certificate);
//! # Ok(())
//! # }
//! ```

mod account;
mod authorization;
mod challenge;
mod directory;
mod error;
mod helpers;
mod hooks;
mod jws;
mod nonce;
mod order;
mod session;
mod transport;

pub use account::*;
pub use authorization::*;
pub use challenge::*;
pub use directory::*;
pub use error::*;
pub use helpers::gen_ec_p256_private_key;
pub use helpers::gen_rsa_private_key;
pub use helpers::Identifier;
pub use hooks::*;
pub use jws::thumbprint;
pub use jws::Jwk;
pub use jws::Jws;
pub use order::*;
pub use session::*;
pub use transport::*;
