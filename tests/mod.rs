use crate::common::hooks::RecordingHook;
use crate::common::mock_acme::*;
use crate::common::*;
use acme2_issuer::*;
use data_encoding::BASE64URL_NOPAD;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::x509::X509Req;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

mod common;

fn decode_segment(segment: &str) -> Value {
  serde_json::from_slice(&BASE64URL_NOPAD.decode(segment.as_bytes()).unwrap())
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn session_reads_directory() {
  let mock = Arc::new(MockAcme::new());
  let session = session(&mock).await.unwrap();

  assert_eq!(session.terms_of_service(), Some(TOS_URL));
  assert_eq!(
    session.directory().new_order_url,
    "https://acme.test/new-order"
  );
  assert_eq!(session.account_url(), None);
  assert!(mock.exchanges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn register_stores_account_locator() {
  let mock = Arc::new(MockAcme::new());
  let (session, _) = registered(&mock).await.unwrap();

  assert_eq!(session.account_url(), Some(ACCOUNT_URL));

  let exchanges = mock.exchanges_to("https://acme.test/new-acct");
  assert_eq!(exchanges.len(), 1);
  let new_account = &exchanges[0];
  assert!(new_account.has_jwk());
  assert_eq!(new_account.kid(), None);
  assert_eq!(
    new_account.payload_json(),
    json!({
      "termsOfServiceAgreed": true,
      "onlyReturnExisting": false,
      "contact": ["mailto:admin@example.com"],
    })
  );
}

#[tokio::test(start_paused = true)]
async fn register_rejects_other_terms() {
  let mock = Arc::new(MockAcme::new());
  let mut session = session(&mock).await.unwrap();
  let options = AccountOptions::new(
    gen_ec_p256_private_key().unwrap(),
    "admin@example.com".to_string(),
    Arc::new(agreement_fn(|_tos: String| async {
      Ok::<_, HookError>("https://acme.test/terms/v0".to_string())
    })),
  );

  let err = session.register(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_AGREE_TOS");
  assert_eq!(session.account_url(), None);
  assert!(mock.exchanges_to("https://acme.test/new-acct").is_empty());
}

#[tokio::test(start_paused = true)]
async fn register_accepts_callback_agreement() {
  let mock = Arc::new(MockAcme::new());
  let mut session = session(&mock).await.unwrap();
  let options = AccountOptions::new(
    gen_ec_p256_private_key().unwrap(),
    "admin@example.com".to_string(),
    Arc::new(agreement_callback(|tos: &str, done: Done<String>| {
      done(Ok(tos.to_string()))
    })),
  );

  session.register(&options).await.unwrap();
  assert_eq!(session.account_url(), Some(ACCOUNT_URL));
}

#[tokio::test(start_paused = true)]
async fn agreement_failure_is_a_hook_error() {
  let mock = Arc::new(MockAcme::new());
  let mut session = session(&mock).await.unwrap();
  let options = AccountOptions::new(
    gen_ec_p256_private_key().unwrap(),
    "admin@example.com".to_string(),
    Arc::new(agreement_callback(|_: &str, done: Done<String>| {
      done(Err("user declined".into()))
    })),
  );

  let err = session.register(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_HOOK");
  assert!(mock.exchanges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_terms_skips_agreement() {
  let mock = Arc::new(MockAcme::new().without_terms());
  let mut session = session(&mock).await.unwrap();
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let options = AccountOptions::new(
    gen_ec_p256_private_key().unwrap(),
    "admin@example.com".to_string(),
    Arc::new(agreement_fn(move |tos: String| {
      counter.fetch_add(1, Ordering::SeqCst);
      async move { Ok::<_, HookError>(tos) }
    })),
  );

  session.register(&options).await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  let new_account = &mock.exchanges_to("https://acme.test/new-acct")[0];
  assert_eq!(new_account.payload_json()["termsOfServiceAgreed"], true);
}

#[tokio::test(start_paused = true)]
async fn external_account_binding_is_attached() {
  let mock = Arc::new(MockAcme::new().require_eab());
  let mut session = session(&mock).await.unwrap();
  let account_key = gen_ec_p256_private_key().unwrap();
  let secret = b"an-hmac-secret-shared-with-the-ca";
  let options = account_options(&account_key).external_account_binding(
    ExternalAccountBinding::new("kid-1".to_string(), secret).unwrap(),
  );

  session.register(&options).await.unwrap();

  let new_account = &mock.exchanges_to("https://acme.test/new-acct")[0];
  let eab = &new_account.payload_json()["externalAccountBinding"];
  let protected = decode_segment(eab["protected"].as_str().unwrap());
  assert_eq!(protected["alg"], "HS256");
  assert_eq!(protected["kid"], "kid-1");
  assert_eq!(protected["url"], "https://acme.test/new-acct");
  assert!(protected.get("nonce").is_none());

  let bound_key = decode_segment(eab["payload"].as_str().unwrap());
  assert_eq!(bound_key, new_account.protected["jwk"]);
}

#[tokio::test(start_paused = true)]
async fn missing_binding_is_refused_locally() {
  let mock = Arc::new(MockAcme::new().require_eab());
  let mut session = session(&mock).await.unwrap();
  let account_key = gen_ec_p256_private_key().unwrap();

  let err = session
    .register(&account_options(&account_key))
    .await
    .unwrap_err();
  assert_eq!(err.code(), "E_CONFIG");
  assert!(mock.exchanges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn issues_certificate_for_one_domain() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

  let certificate = session.get_certificate(&options).await.unwrap();

  assert_eq!(certificate.certificate, CERT_BODY);
  assert_eq!(certificate.certificate_url, CERT_URL);
  assert_eq!(certificate.expires.as_deref(), Some(ORDER_EXPIRES));
  assert_eq!(
    hook.calls(),
    vec![
      "set example.com http-01 abc".to_string(),
      "remove example.com http-01 abc".to_string(),
    ]
  );

  let descriptor = &hook.descriptors()[0];
  let thumbprint = thumbprint(&account_key).unwrap();
  assert_eq!(descriptor.identifier, Identifier::dns("example.com"));
  assert_eq!(descriptor.thumbprint, thumbprint);
  assert_eq!(descriptor.key_authorization, format!("abc.{}", thumbprint));
  assert_eq!(
    descriptor.dns_authorization,
    BASE64URL_NOPAD.encode(
      &hash(MessageDigest::sha256(), descriptor.key_authorization.as_bytes())
        .unwrap()
    )
  );

  assert_eq!(session.order_url(), Some(ORDER_URL));
  assert_eq!(session.finalize_url(), Some(FINALIZE_URL));
  assert_eq!(
    session.authorization_urls(),
    &["https://acme.test/authz/example.com".to_string()]
  );
  assert_eq!(session.certificate_url(), Some(CERT_URL));
  assert_eq!(session.expires(), Some(ORDER_EXPIRES));

  let csr = X509Req::from_der(&mock.csr().unwrap()).unwrap();
  assert!(csr.verify(&options.domain_key).unwrap());

  let triggers = mock.exchanges_to("https://acme.test/chall/example.com/http-01");
  assert_eq!(triggers.len(), 1);
  assert_eq!(triggers[0].payload, "{}");
}

#[tokio::test(start_paused = true)]
async fn every_signed_request_uses_the_previous_replay_nonce() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options = certificate_options(
    &account_key,
    &["example.com", "www.example.com", "api.example.com"],
    hook,
  )
  .unwrap();

  session.get_certificate(&options).await.unwrap();

  let heads = mock.head_nonces();
  assert_eq!(heads.len(), 1);
  let exchanges = mock.exchanges();
  assert_eq!(exchanges[0].nonce(), Some(heads[0].as_str()));
  for pair in exchanges.windows(2) {
    assert_eq!(pair[1].nonce(), Some(pair[0].response_nonce.as_str()));
  }
  for exchange in &exchanges[1..] {
    assert_eq!(exchange.kid(), Some(ACCOUNT_URL));
    assert!(!exchange.has_jwk());
  }
}

#[tokio::test(start_paused = true)]
async fn invalid_challenge_fails_the_order() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().statuses(&[Some("pending"), Some("invalid")]),
  ));
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

  let err = session.get_certificate(&options).await.unwrap_err();
  match err {
    Error::BadChallengeState {
      identifier,
      failure: ChallengeFailure::Invalid(Some(problem)),
    } => {
      assert_eq!(identifier, "example.com");
      assert_eq!(
        problem.r#type.as_deref(),
        Some("urn:ietf:params:acme:error:unauthorized")
      );
    }
    other => panic!("unexpected {:?}", other),
  }
  assert!(hook.calls_starting_with("remove").is_empty());
  assert!(mock.exchanges_to(FINALIZE_URL).is_empty());
  assert_eq!(session.certificate_url(), None);
}

#[tokio::test(start_paused = true)]
async fn missing_and_unknown_statuses_are_bad_state() {
  for (statuses, expected) in [
    (vec![None], ChallengeFailure::MissingStatus),
    (
      vec![Some("weird")],
      ChallengeFailure::Unrecognized("weird".to_string()),
    ),
  ] {
    let mock = Arc::new(
      MockAcme::new()
        .domain("example.com", DomainScript::default().statuses(&statuses)),
    );
    let (mut session, account_key) = registered(&mock).await.unwrap();
    let hook = Arc::new(RecordingHook::default());
    let options =
      certificate_options(&account_key, &["example.com"], hook).unwrap();

    match session.create_order(&options).await.unwrap_err() {
      Error::BadChallengeState { failure, .. } => assert_eq!(failure, expected),
      other => panic!("unexpected {:?}", other),
    }
  }
}

#[tokio::test(start_paused = true)]
async fn one_failing_domain_fails_all() {
  let mock = Arc::new(
    MockAcme::new()
      .domain(
        "good.example.com",
        DomainScript::default().statuses(&[
          Some("pending"),
          Some("pending"),
          Some("valid"),
        ]),
      )
      .domain(
        "bad.example.com",
        DomainScript::default().token("xyz").statuses(&[Some("invalid")]),
      ),
  );
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options = certificate_options(
    &account_key,
    &["good.example.com", "bad.example.com"],
    hook.clone(),
  )
  .unwrap();

  let err = session.get_certificate(&options).await.unwrap_err();
  match err {
    Error::BadChallengeState { identifier, .. } => {
      assert_eq!(identifier, "bad.example.com")
    }
    other => panic!("unexpected {:?}", other),
  }

  let sets = hook.calls_starting_with("set");
  assert!(sets.contains(&"set good.example.com http-01 abc".to_string()));
  assert!(sets.contains(&"set bad.example.com http-01 xyz".to_string()));
  // The good flow was still polling when the bad one failed.
  assert!(hook.calls_starting_with("remove").is_empty());
  assert!(mock.exchanges_to(FINALIZE_URL).is_empty());
  assert_eq!(session.certificate_url(), None);
}

#[tokio::test(start_paused = true)]
async fn unsupported_challenge_fails_before_hooks() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().offered(&["tls-alpn-01"]),
  ));
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

  let err = session.create_order(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_UNSUPPORTED_CHALLENGE");
  assert!(hook.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn first_requested_offered_type_wins() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().offered(&["http-01", "tls-alpn-01"]),
  ));
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options = certificate_options(&account_key, &["example.com"], hook.clone())
    .unwrap()
    .challenge_types(vec!["dns-01".to_string(), "http-01".to_string()]);

  session.create_order(&options).await.unwrap();

  assert_eq!(hook.descriptors()[0].r#type, "http-01");
  assert_eq!(
    mock
      .exchanges_to("https://acme.test/chall/example.com/http-01")
      .len(),
    1
  );
}

#[tokio::test(start_paused = true)]
async fn polling_continues_through_pending_and_processing() {
  let mock = Arc::new(
    MockAcme::new()
      .domain(
        "example.com",
        DomainScript::default().statuses(&[
          Some("pending"),
          Some("processing"),
          Some("pending"),
          Some("valid"),
        ]),
      )
      .order_statuses(&["processing", "processing", "processing", "valid"]),
  );
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  session.get_certificate(&options).await.unwrap();

  assert_eq!(mock.challenge_reads("example.com"), 4);
  // The finalize response plus three order reads.
  assert_eq!(mock.order_reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn invalid_order_is_a_finalize_failure() {
  let mock = Arc::new(MockAcme::new().order_statuses(&["processing", "invalid"]));
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  match session.get_certificate(&options).await.unwrap_err() {
    Error::FinalizeFailed { status, error } => {
      assert_eq!(status, Some(OrderStatus::Invalid));
      assert_eq!(
        error.unwrap().r#type.as_deref(),
        Some("urn:ietf:params:acme:error:badCSR")
      );
    }
    other => panic!("unexpected {:?}", other),
  }
  assert!(!mock.reads().iter().any(|(_, url)| url == CERT_URL));
  assert_eq!(session.certificate_url(), None);
}

#[tokio::test(start_paused = true)]
async fn bounded_polling_gives_up() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().statuses(&[Some("pending")]),
  ));
  let account_key = gen_ec_p256_private_key().unwrap();
  let mut session = session_with(&mock, |builder| {
    builder.challenge_poll(PollPolicy::new(Duration::from_secs(1), 3));
  })
  .await
  .unwrap();
  session.register(&account_options(&account_key)).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  let err = session.get_certificate(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_MAX_ATTEMPTS");
  assert_eq!(mock.challenge_reads("example.com"), 3);
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_unbounded_polling() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().statuses(&[Some("pending")]),
  ));
  let account_key = gen_ec_p256_private_key().unwrap();
  let mut session = session_with(&mock, |builder| {
    builder
      .challenge_poll(PollPolicy::unbounded(Duration::from_secs(1)))
      .deadline(Duration::from_secs(30));
  })
  .await
  .unwrap();
  session.register(&account_options(&account_key)).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  let err = session.get_certificate(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_DEADLINE");
  assert!(mock.challenge_reads("example.com") >= 29);
}

#[tokio::test(start_paused = true)]
async fn post_as_get_signs_every_read() {
  let mock = Arc::new(MockAcme::new());
  let account_key = gen_ec_p256_private_key().unwrap();
  let mut session = session_with(&mock, |builder| {
    builder.fetch_mode(FetchMode::PostAsGet);
  })
  .await
  .unwrap();
  session.register(&account_options(&account_key)).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options = certificate_options(
    &account_key,
    &["example.com", "www.example.com"],
    hook,
  )
  .unwrap();

  let certificate = session.get_certificate(&options).await.unwrap();
  assert_eq!(certificate.certificate, CERT_BODY);

  let reads = mock.reads();
  assert_eq!(
    reads
      .iter()
      .filter(|(method, _)| *method == Method::Get)
      .map(|(_, url)| url.as_str())
      .collect::<Vec<_>>(),
    vec![DIRECTORY_URL]
  );
  assert!(reads
    .iter()
    .any(|(method, url)| *method == Method::Post && url == CERT_URL));

  let exchanges = mock.exchanges();
  for pair in exchanges.windows(2) {
    assert_eq!(pair[1].nonce(), Some(pair[0].response_nonce.as_str()));
  }
}

#[tokio::test(start_paused = true)]
async fn remove_failure_does_not_fail_issuance() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::failing_remove());
  let options =
    certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

  let certificate = session.get_certificate(&options).await.unwrap();
  assert_eq!(certificate.certificate, CERT_BODY);
  assert_eq!(hook.calls_starting_with("remove").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn set_failure_stops_before_responding() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::failing_set());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  let err = session.get_certificate(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_HOOK");
  assert!(mock.challenge_triggers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn valid_authorizations_are_skipped() {
  let mock = Arc::new(MockAcme::new().domain(
    "example.com",
    DomainScript::default().authorization_status("valid"),
  ));
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

  let certificate = session.get_certificate(&options).await.unwrap();
  assert_eq!(certificate.certificate, CERT_BODY);
  assert!(hook.calls().is_empty());
  assert!(mock.challenge_triggers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn finished_authorizations_fail_before_hooks() {
  for status in ["invalid", "expired", "processing"] {
    let mock = Arc::new(MockAcme::new().domain(
      "example.com",
      DomainScript::default().authorization_status(status),
    ));
    let (mut session, account_key) = registered(&mock).await.unwrap();
    let hook = Arc::new(RecordingHook::default());
    let options =
      certificate_options(&account_key, &["example.com"], hook.clone()).unwrap();

    match session.create_order(&options).await.unwrap_err() {
      Error::BadChallengeState {
        identifier,
        failure,
      } => {
        assert_eq!(identifier, "example.com");
        assert_eq!(
          failure,
          ChallengeFailure::Authorization(status.to_string())
        );
      }
      other => panic!("unexpected {:?}", other),
    }
    assert!(hook.calls().is_empty());
    assert!(mock.challenge_triggers().is_empty());
  }
}

#[tokio::test(start_paused = true)]
async fn challenge_types_are_required() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options = certificate_options(&account_key, &["example.com"], hook)
    .unwrap()
    .challenge_types(vec![]);

  let err = session.get_certificate(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_CONFIG");
  assert!(mock.exchanges_to("https://acme.test/new-order").is_empty());
}

#[tokio::test(start_paused = true)]
async fn ordering_needs_an_account() {
  let mock = Arc::new(MockAcme::new());
  let mut session = session(&mock).await.unwrap();
  let account_key = gen_ec_p256_private_key().unwrap();
  let hook = Arc::new(RecordingHook::default());
  let options =
    certificate_options(&account_key, &["example.com"], hook).unwrap();

  let err = session.create_order(&options).await.unwrap_err();
  assert_eq!(err.code(), "E_CONFIG");
  assert!(mock.exchanges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn positional_hooks_drive_issuance() {
  let mock = Arc::new(MockAcme::new());
  let (mut session, account_key) = registered(&mock).await.unwrap();
  let seen = Arc::new(Mutex::new(vec![]));
  let set_seen = seen.clone();
  let remove_seen = seen.clone();
  let hook = legacy_challenge(
    move |hostname: &str, token: &str, key_auth: &str, done: Done<()>| {
      set_seen
        .lock()
        .unwrap()
        .push(format!("set {} {} {}", hostname, token, key_auth));
      done(Ok(()))
    },
    move |hostname: &str, token: &str, done: Done<()>| {
      remove_seen
        .lock()
        .unwrap()
        .push(format!("remove {} {}", hostname, token));
      done(Ok(()))
    },
  );
  let options =
    certificate_options(&account_key, &["example.com"], Arc::new(hook)).unwrap();

  session.get_certificate(&options).await.unwrap();

  let thumbprint = thumbprint(&account_key).unwrap();
  assert_eq!(
    *seen.lock().unwrap(),
    vec![
      format!("set example.com abc abc.{}", thumbprint),
      "remove example.com abc".to_string(),
    ]
  );
}
