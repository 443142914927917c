// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Basic` authentication scheme as in
//! [RFC 7617](https://datatracker.ietf.org/doc/html/rfc7617).

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use log::debug;

use crate::header::ChallengeWriter;
use crate::outcome::{AuthError, Outcome};
use crate::parser::{is_token68, parse_credentials};
use crate::{BoxError, RequestParams, Strategy};

/// Accepts payloads with or without trailing `=` padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded `user-pass`.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A `Basic` payload that could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCredentials {
    #[error("payload is not base64")]
    NotBase64,

    #[error("decoded payload is not UTF-8")]
    NotUtf8,

    #[error("decoded payload has no ':' separator")]
    NoSeparator,
}

/// Decodes a `Basic` payload (the `token68` after the scheme).
///
/// The username ends at the first `:`; the password is everything after it,
/// including any further colons. Either may be empty.
pub fn decode_credentials(payload: &str) -> Result<Credentials, MalformedCredentials> {
    let decoded = LENIENT
        .decode(payload)
        .map_err(|_| MalformedCredentials::NotBase64)?;
    let decoded = String::from_utf8(decoded).map_err(|_| MalformedCredentials::NotUtf8)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(MalformedCredentials::NoSeparator)?;
    Ok(Credentials {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

/// Returns the `Authorization` value a client would send for these
/// credentials.
///
/// ```rust
/// assert_eq!(
///     http_auth_strategies::basic::authorization("Aladdin", "open sesame"),
///     "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==",
/// );
/// ```
pub fn authorization(username: &str, password: &str) -> String {
    let user_pass = format!("{}:{}", username, password);
    const PREFIX: &str = "Basic ";
    let encoded_len = base64::encoded_len(user_pass.len(), true).unwrap_or(0);
    let mut value = String::with_capacity(PREFIX.len() + encoded_len);
    value.push_str(PREFIX);
    STANDARD.encode_string(&user_pass, &mut value);
    value
}

/// Configuration for a [`BasicStrategy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BasicConfig {
    /// Realm named in the challenge. Defaults to `Users`.
    pub realm: String,

    /// Hand the request to [`Verify::verify`]. Defaults to false.
    pub pass_request_to_callback: bool,
}

impl Default for BasicConfig {
    fn default() -> Self {
        BasicConfig {
            realm: "Users".to_owned(),
            pass_request_to_callback: false,
        }
    }
}

/// A verified user, with optional application info.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verified<U> {
    pub user: U,
    pub info: Option<String>,
}

impl<U> Verified<U> {
    pub fn new(user: U) -> Self {
        Verified { user, info: None }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }
}

/// Application callback which checks a username and password.
#[async_trait]
pub trait Verify: Send + Sync {
    type User: Send;

    /// Returns `Ok(None)` if the credentials are wrong.
    ///
    /// `request` is supplied only when
    /// [`BasicConfig::pass_request_to_callback`] is set.
    async fn verify(
        &self,
        request: Option<&RequestParams<'_>>,
        username: &str,
        password: &str,
    ) -> Result<Option<Verified<Self::User>>, BoxError>;
}

/// Strategy for the `Basic` scheme.
pub struct BasicStrategy<V> {
    config: BasicConfig,
    challenge: String,
    verify: V,
}

impl<V: Verify> BasicStrategy<V> {
    pub fn new(config: BasicConfig, verify: V) -> Self {
        let challenge = ChallengeWriter::new("Basic")
            .quoted("realm", &config.realm)
            .finish();
        BasicStrategy {
            config,
            challenge,
            verify,
        }
    }

    pub fn config(&self) -> &BasicConfig {
        &self.config
    }

    /// The `WWW-Authenticate` value sent with every `401`.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Extracts credentials from the `Authorization` value.
    fn credentials(&self, authorization: Option<&str>) -> Result<Credentials, AuthError> {
        let value = match authorization {
            Some(v) if !v.trim_matches(|c| c == ' ' || c == '\t').is_empty() => v,
            _ => return Err(AuthError::NoCredentials),
        };
        let parsed =
            parse_credentials(value).map_err(|e| AuthError::MalformedCredentials(e.to_string()))?;
        if parsed.payload.is_empty() {
            return Err(AuthError::MalformedCredentials(
                "credentials have no payload".to_owned(),
            ));
        }
        if !parsed.is_scheme("Basic") {
            return Err(AuthError::NoCredentials);
        }
        if !is_token68(parsed.payload) {
            return Err(AuthError::MalformedCredentials(
                "payload is not a token68".to_owned(),
            ));
        }
        decode_credentials(parsed.payload)
            .map_err(|e| AuthError::MalformedCredentials(e.to_string()))
    }

    async fn verify_request(
        &self,
        req: &RequestParams<'_>,
    ) -> Result<Verified<V::User>, AuthError> {
        let creds = self.credentials(req.authorization)?;
        let request = if self.config.pass_request_to_callback {
            Some(req)
        } else {
            None
        };
        match self
            .verify
            .verify(request, &creds.username, &creds.password)
            .await
        {
            Ok(Some(v)) => Ok(v),
            Ok(None) => {
                debug!("basic: credentials for {:?} rejected", creds.username);
                Err(AuthError::VerificationFailed { stale: false })
            }
            Err(e) => Err(AuthError::Upstream(e)),
        }
    }
}

#[async_trait]
impl<V: Verify> Strategy for BasicStrategy<V> {
    type User = V::User;

    fn name(&self) -> &'static str {
        "basic"
    }

    async fn authenticate(&self, req: &RequestParams<'_>) -> Outcome<V::User> {
        match self.verify_request(req).await {
            Ok(Verified { user, info }) => Outcome::Success { user, info },
            Err(e) => {
                debug!("basic: {}", e);
                Outcome::from_error(e, |_| self.challenge.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::outcome::tests::Recorder;
    use crate::outcome::{Failure, Once};
    use pretty_assertions::assert_eq;

    /// Accepts everything, echoing the credentials back as the user.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
        saw_request: AtomicUsize,
    }

    #[async_trait]
    impl Verify for Echo {
        type User = (String, String);

        async fn verify(
            &self,
            request: Option<&RequestParams<'_>>,
            username: &str,
            password: &str,
        ) -> Result<Option<Verified<Self::User>>, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.is_some() {
                self.saw_request.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Some(Verified::new((
                username.to_owned(),
                password.to_owned(),
            ))))
        }
    }

    struct Reject;

    #[async_trait]
    impl Verify for Reject {
        type User = String;

        async fn verify(
            &self,
            _request: Option<&RequestParams<'_>>,
            _username: &str,
            _password: &str,
        ) -> Result<Option<Verified<String>>, BoxError> {
            Ok(None)
        }
    }

    struct Broken;

    #[async_trait]
    impl Verify for Broken {
        type User = String;

        async fn verify(
            &self,
            _request: Option<&RequestParams<'_>>,
            _username: &str,
            _password: &str,
        ) -> Result<Option<Verified<String>>, BoxError> {
            Err("something went wrong".into())
        }
    }

    struct Bob;

    #[async_trait]
    impl Verify for Bob {
        type User = String;

        async fn verify(
            &self,
            _request: Option<&RequestParams<'_>>,
            username: &str,
            password: &str,
        ) -> Result<Option<Verified<String>>, BoxError> {
            Ok((username == "bob" && password == "secret")
                .then(|| Verified::new("bob".to_owned()).with_info("welcome")))
        }
    }

    fn request(authorization: Option<&str>) -> RequestParams<'_> {
        RequestParams {
            method: "GET",
            uri: "/",
            authorization,
            body: None,
        }
    }

    async fn echo(authorization: Option<&str>) -> Outcome<(String, String)> {
        BasicStrategy::new(BasicConfig::default(), Echo::default())
            .authenticate(&request(authorization))
            .await
    }

    fn user(outcome: Outcome<(String, String)>) -> (String, String) {
        match outcome {
            Outcome::Success { user, .. } => user,
            o => panic!("expected success, got {:?}", o),
        }
    }

    #[test]
    fn decode() {
        assert_eq!(
            decode_credentials("Ym9iOnNlY3JldDpwdw==").unwrap(),
            Credentials {
                username: "bob".into(),
                password: "secret:pw".into()
            }
        );
        assert_eq!(
            decode_credentials("Ym9iOnNlY3JldA").unwrap().password,
            "secret"
        );
        assert_eq!(
            decode_credentials("Ym9i"),
            Err(MalformedCredentials::NoSeparator)
        );
        assert_eq!(
            decode_credentials("*****"),
            Err(MalformedCredentials::NotBase64)
        );
        assert_eq!(decode_credentials("/w=="), Err(MalformedCredentials::NotUtf8));
    }

    #[test]
    fn round_trip() {
        for (u, p) in [
            ("bob", "secret"),
            ("", "password"),
            ("bob", ""),
            ("bob", "secret:pw"),
            ("Jäsøn", "Secret, or not?"),
        ] {
            let value = authorization(u, p);
            let payload = value.strip_prefix("Basic ").unwrap();
            let c = decode_credentials(payload).unwrap();
            assert_eq!((c.username.as_str(), c.password.as_str()), (u, p));
        }
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let c = decode_credentials("Ym9iOnNlY3JldA==").unwrap();
        assert!(!format!("{:?}", c).contains("secret"));
    }

    #[test]
    fn name() {
        assert_eq!(
            BasicStrategy::new(BasicConfig::default(), Reject).name(),
            "basic"
        );
    }

    #[tokio::test]
    async fn authenticates() {
        assert_eq!(
            user(echo(Some("Basic Ym9iOnNlY3JldA==")).await),
            ("bob".into(), "secret".into())
        );
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        assert_eq!(
            user(echo(Some("BASIC Ym9iOnNlY3JldA==")).await),
            ("bob".into(), "secret".into())
        );
    }

    #[tokio::test]
    async fn colon_in_password() {
        assert_eq!(
            user(echo(Some("Basic Ym9iOnNlY3JldDpwdw==")).await),
            ("bob".into(), "secret:pw".into())
        );
    }

    #[tokio::test]
    async fn empty_username_and_password() {
        assert_eq!(
            user(echo(Some("Basic OnBhc3N3b3Jk")).await),
            ("".into(), "password".into())
        );
        assert_eq!(
            user(echo(Some("Basic Ym9iOg==")).await),
            ("bob".into(), "".into())
        );
    }

    #[tokio::test]
    async fn missing_header_challenges() {
        assert_eq!(
            echo(None).await.failure(),
            Some(&Failure::unauthorized(r#"Basic realm="Users""#.into()))
        );
    }

    #[tokio::test]
    async fn empty_header_challenges() {
        for value in ["", " \t "] {
            assert_eq!(
                echo(Some(value)).await.failure(),
                Some(&Failure::unauthorized(r#"Basic realm="Users""#.into())),
                "{:?}",
                value
            );
        }
    }

    #[tokio::test]
    async fn other_scheme_challenges() {
        assert_eq!(
            echo(Some("XXXXX Ym9iOnNlY3JldA==")).await.failure(),
            Some(&Failure::unauthorized(r#"Basic realm="Users""#.into()))
        );
    }

    #[tokio::test]
    async fn malformed_is_bad_request() {
        for value in [
            "Basic",
            "Basic ",
            "Basic Ym9i",
            "Basic *****",
            "Basic Ym9i Ym9i",
        ] {
            assert_eq!(
                echo(Some(value)).await.failure(),
                Some(&Failure::bad_request()),
                "{:?}",
                value
            );
        }
    }

    #[tokio::test]
    async fn rejected_challenges_with_realm() {
        let strategy = BasicStrategy::new(
            BasicConfig {
                realm: "Administrators".into(),
                ..Default::default()
            },
            Reject,
        );
        assert_eq!(
            strategy
                .authenticate(&request(Some("Basic Ym9iOnNlY3JldA==")))
                .await
                .failure(),
            Some(&Failure::unauthorized(
                r#"Basic realm="Administrators""#.into()
            ))
        );
    }

    #[tokio::test]
    async fn verify_error_is_error() {
        let strategy = BasicStrategy::new(BasicConfig::default(), Broken);
        let mut once = Once::new(Recorder::default());
        strategy
            .authenticate_with(&request(Some("Basic Ym9iOnNlY3JldA==")), &mut once)
            .await;
        let r = once.into_inner();
        assert_eq!(r.calls, vec!["error"]);
        assert_eq!(r.error.as_deref(), Some("something went wrong"));
    }

    #[tokio::test]
    async fn success_dispatched_exactly_once() {
        let strategy = BasicStrategy::new(BasicConfig::default(), Bob);
        let mut once = Once::new(Recorder::default());
        strategy
            .authenticate_with(&request(Some("Basic Ym9iOnNlY3JldA==")), &mut once)
            .await;
        let r = once.into_inner();
        assert_eq!(r.calls, vec!["success"]);
        assert_eq!(r.user.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn info_is_forwarded() {
        let strategy = BasicStrategy::new(BasicConfig::default(), Bob);
        match strategy
            .authenticate(&request(Some("Basic Ym9iOnNlY3JldA==")))
            .await
        {
            Outcome::Success { info, .. } => assert_eq!(info.as_deref(), Some("welcome")),
            o => panic!("unexpected {:?}", o),
        }
    }

    #[tokio::test]
    async fn passes_request_only_when_configured() {
        let req = request(Some("Basic Ym9iOnNlY3JldA=="));

        let plain = BasicStrategy::new(BasicConfig::default(), Echo::default());
        assert!(plain.authenticate(&req).await.is_success());
        assert_eq!(plain.verify.saw_request.load(Ordering::SeqCst), 0);

        let forwarding = BasicStrategy::new(
            BasicConfig {
                pass_request_to_callback: true,
                ..Default::default()
            },
            Echo::default(),
        );
        assert!(forwarding.authenticate(&req).await.is_success());
        assert_eq!(forwarding.verify.calls.load(Ordering::SeqCst), 1);
        assert_eq!(forwarding.verify.saw_request.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_never_reaches_callback() {
        let strategy = BasicStrategy::new(BasicConfig::default(), Echo::default());
        let _ = strategy.authenticate(&request(Some("Basic Ym9i"))).await;
        assert_eq!(strategy.verify.calls.load(Ordering::SeqCst), 0);
    }
}
