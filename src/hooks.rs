//! Caller-supplied extension points.
//!
//! The core only ever talks to [`AgreementHook`] and [`ChallengeHook`].
//! Applications written against callback-style or positional conventions
//! wrap their functions with the adapters in this module.

use crate::challenge::ChallengeDescriptor;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::oneshot;

/// The error a hook reports back to the core.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Completion callback handed to callback-style hooks.
pub type Done<T> = Box<dyn FnOnce(Result<T, HookError>) + Send>;

/// Decides whether the caller agrees to the server's terms of service.
#[async_trait]
pub trait AgreementHook: Send + Sync {
  /// Returns the terms of service URL the caller agrees to. Registration
  /// only proceeds if this is exactly `tos_url`.
  async fn agree_to_terms(&self, tos_url: &str) -> Result<String, HookError>;
}

/// Publishes and withdraws the proof for a challenge.
///
/// `set_challenge` must only return once the proof is reachable by the
/// server (HTTP resource served, DNS record visible, ...).
#[async_trait]
pub trait ChallengeHook: Send + Sync {
  async fn set_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError>;

  /// Best effort. Failures are logged and otherwise ignored.
  async fn remove_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError>;
}

#[derive(Debug, thiserror::Error)]
#[error("hook dropped its completion callback without calling it")]
pub struct CallbackDropped;

fn completion<T: Send + 'static>(
) -> (Done<T>, oneshot::Receiver<Result<T, HookError>>) {
  let (tx, rx) = oneshot::channel();
  let done: Done<T> = Box::new(move |res| {
    let _ = tx.send(res);
  });
  (done, rx)
}

async fn completed<T>(
  rx: oneshot::Receiver<Result<T, HookError>>,
) -> Result<T, HookError> {
  match rx.await {
    Ok(res) => res,
    Err(_) => Err(Box::new(CallbackDropped)),
  }
}

/// Agrees to whatever terms of service the server publishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptTerms;

#[async_trait]
impl AgreementHook for AcceptTerms {
  async fn agree_to_terms(&self, tos_url: &str) -> Result<String, HookError> {
    Ok(tos_url.to_string())
  }
}

pub struct AgreementFn<F>(F);

/// Adapts `async fn(tos_url) -> Result<agreed_url, _>`.
pub fn agreement_fn<F, Fut>(f: F) -> AgreementFn<F>
where
  F: Fn(String) -> Fut + Send + Sync,
  Fut: Future<Output = Result<String, HookError>> + Send + 'static,
{
  AgreementFn(f)
}

#[async_trait]
impl<F, Fut> AgreementHook for AgreementFn<F>
where
  F: Fn(String) -> Fut + Send + Sync,
  Fut: Future<Output = Result<String, HookError>> + Send + 'static,
{
  async fn agree_to_terms(&self, tos_url: &str) -> Result<String, HookError> {
    (self.0)(tos_url.to_string()).await
  }
}

pub struct AgreementCallback<F>(F);

/// Adapts `fn(tos_url, done)` where `done(Result<agreed_url, _>)` is called
/// exactly once, possibly from another thread.
pub fn agreement_callback<F>(f: F) -> AgreementCallback<F>
where
  F: Fn(&str, Done<String>) + Send + Sync,
{
  AgreementCallback(f)
}

#[async_trait]
impl<F> AgreementHook for AgreementCallback<F>
where
  F: Fn(&str, Done<String>) + Send + Sync,
{
  async fn agree_to_terms(&self, tos_url: &str) -> Result<String, HookError> {
    let (done, rx) = completion();
    (self.0)(tos_url, done);
    completed(rx).await
  }
}

pub struct ChallengeFn<S, R> {
  set: S,
  remove: R,
}

/// Adapts a pair of `async fn(descriptor) -> Result<(), _>`.
pub fn challenge_fn<S, SFut, R, RFut>(set: S, remove: R) -> ChallengeFn<S, R>
where
  S: Fn(ChallengeDescriptor) -> SFut + Send + Sync,
  SFut: Future<Output = Result<(), HookError>> + Send + 'static,
  R: Fn(ChallengeDescriptor) -> RFut + Send + Sync,
  RFut: Future<Output = Result<(), HookError>> + Send + 'static,
{
  ChallengeFn { set, remove }
}

#[async_trait]
impl<S, SFut, R, RFut> ChallengeHook for ChallengeFn<S, R>
where
  S: Fn(ChallengeDescriptor) -> SFut + Send + Sync,
  SFut: Future<Output = Result<(), HookError>> + Send + 'static,
  R: Fn(ChallengeDescriptor) -> RFut + Send + Sync,
  RFut: Future<Output = Result<(), HookError>> + Send + 'static,
{
  async fn set_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    (self.set)(challenge.clone()).await
  }

  async fn remove_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    (self.remove)(challenge.clone()).await
  }
}

pub struct ChallengeCallback<S, R> {
  set: S,
  remove: R,
}

/// Adapts a pair of `fn(descriptor, done)`.
pub fn challenge_callback<S, R>(set: S, remove: R) -> ChallengeCallback<S, R>
where
  S: Fn(&ChallengeDescriptor, Done<()>) + Send + Sync,
  R: Fn(&ChallengeDescriptor, Done<()>) + Send + Sync,
{
  ChallengeCallback { set, remove }
}

#[async_trait]
impl<S, R> ChallengeHook for ChallengeCallback<S, R>
where
  S: Fn(&ChallengeDescriptor, Done<()>) + Send + Sync,
  R: Fn(&ChallengeDescriptor, Done<()>) + Send + Sync,
{
  async fn set_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    let (done, rx) = completion();
    (self.set)(challenge, done);
    completed(rx).await
  }

  async fn remove_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    let (done, rx) = completion();
    (self.remove)(challenge, done);
    completed(rx).await
  }
}

pub struct LegacyChallenge<S, R> {
  set: S,
  remove: R,
}

/// Adapts the positional convention: `set(hostname, token,
/// key_authorization, done)` and `remove(hostname, token, done)`.
pub fn legacy_challenge<S, R>(set: S, remove: R) -> LegacyChallenge<S, R>
where
  S: Fn(&str, &str, &str, Done<()>) + Send + Sync,
  R: Fn(&str, &str, Done<()>) + Send + Sync,
{
  LegacyChallenge { set, remove }
}

#[async_trait]
impl<S, R> ChallengeHook for LegacyChallenge<S, R>
where
  S: Fn(&str, &str, &str, Done<()>) + Send + Sync,
  R: Fn(&str, &str, Done<()>) + Send + Sync,
{
  async fn set_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    let (done, rx) = completion();
    (self.set)(
      &challenge.hostname,
      &challenge.token,
      &challenge.key_authorization,
      done,
    );
    completed(rx).await
  }

  async fn remove_challenge(
    &self,
    challenge: &ChallengeDescriptor,
  ) -> Result<(), HookError> {
    let (done, rx) = completion();
    (self.remove)(&challenge.hostname, &challenge.token, done);
    completed(rx).await
  }
}
