// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `Digest` authentication scheme, as in
//! [RFC 7616](https://datatracker.ietf.org/doc/html/rfc7616) and its
//! predecessors [RFC 2617](https://datatracker.ietf.org/doc/html/rfc2617) and
//! [RFC 2069](https://datatracker.ietf.org/doc/html/rfc2069).
//!
//! A [`DigestStrategy`] issues challenges with a fresh nonce, parses the
//! client's [`DigestCredentials`], asks a [`SecretSource`] for the user's
//! password (or precomputed `HA1`), recomputes the expected response and
//! compares it in constant time. An optional [`NonceValidator`] then gets a
//! say on nonce reuse.

use std::str::FromStr;

use async_trait::async_trait;
use digest::Digest;
use log::debug;
use subtle::ConstantTimeEq as _;

use crate::header::ChallengeWriter;
use crate::nonce::{random_token, NonceManager, NonceStatus, NonceTracking};
use crate::outcome::{AuthError, Outcome};
use crate::parser::{parse_credentials, ParamParser};
use crate::{BoxError, RequestParams, Strategy};

/// Returns the hex-encoded hash of `items`, joined by `:`.
fn h<D: Digest>(mut d: D, items: &[&[u8]]) -> String {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            d.update(b":");
        }
        d.update(item);
    }
    hex::encode(d.finalize())
}

/// Supported hash algorithms.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Algorithm {
    Md5,
    Sha256,
    Sha512Trunc256,
}

impl Algorithm {
    fn h(self, items: &[&[u8]]) -> String {
        match self {
            Algorithm::Md5 => h(md5::Md5::new(), items),
            Algorithm::Sha256 => h(sha2::Sha256::new(), items),
            Algorithm::Sha512Trunc256 => h(sha2::Sha512_256::new(), items),
        }
    }
}

/// Algorithm and whether it is the `-sess` variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AlgorithmSession {
    pub algorithm: Algorithm,
    pub session: bool,
}

impl AlgorithmSession {
    pub const MD5: AlgorithmSession = AlgorithmSession {
        algorithm: Algorithm::Md5,
        session: false,
    };

    /// The token used in `algorithm=` directives.
    pub fn as_str(self) -> &'static str {
        match (self.algorithm, self.session) {
            (Algorithm::Md5, false) => "MD5",
            (Algorithm::Md5, true) => "MD5-sess",
            (Algorithm::Sha256, false) => "SHA-256",
            (Algorithm::Sha256, true) => "SHA-256-sess",
            (Algorithm::Sha512Trunc256, false) => "SHA-512-256",
            (Algorithm::Sha512Trunc256, true) => "SHA-512-256-sess",
        }
    }
}

impl Default for AlgorithmSession {
    fn default() -> Self {
        AlgorithmSession::MD5
    }
}

impl std::fmt::Display for AlgorithmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown digest algorithm {0:?}")]
pub struct UnknownAlgorithm(String);

impl FromStr for AlgorithmSession {
    type Err = UnknownAlgorithm;

    /// Parses an algorithm token, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, session) = match s.len().checked_sub(5) {
            Some(i) if s.is_char_boundary(i) && s[i..].eq_ignore_ascii_case("-sess") => {
                (&s[..i], true)
            }
            _ => (s, false),
        };
        let algorithm = if base.eq_ignore_ascii_case("MD5") {
            Algorithm::Md5
        } else if base.eq_ignore_ascii_case("SHA-256") {
            Algorithm::Sha256
        } else if base.eq_ignore_ascii_case("SHA-512-256") {
            Algorithm::Sha512Trunc256
        } else {
            return Err(UnknownAlgorithm(s.to_owned()));
        };
        Ok(AlgorithmSession { algorithm, session })
    }
}

/// Quality of protection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Qop {
    /// Authentication of the request line only.
    Auth = 1,

    /// Authentication including the entity body.
    AuthInt = 2,
}

impl Qop {
    pub fn as_str(self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

impl std::fmt::Display for Qop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown qop {0:?}")]
pub struct UnknownQop(String);

impl FromStr for Qop {
    type Err = UnknownQop;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auth") {
            Ok(Qop::Auth)
        } else if s.eq_ignore_ascii_case("auth-int") {
            Ok(Qop::AuthInt)
        } else {
            Err(UnknownQop(s.to_owned()))
        }
    }
}

/// A set of [`Qop`] values, in the order `auth`, `auth-int`.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct QopSet(u8);

impl QopSet {
    /// No qop: RFC 2069 compatibility mode.
    pub const NONE: QopSet = QopSet(0);
    pub const AUTH: QopSet = QopSet(Qop::Auth as u8);
    pub const ALL: QopSet = QopSet(Qop::Auth as u8 | Qop::AuthInt as u8);

    pub fn with(self, qop: Qop) -> Self {
        QopSet(self.0 | qop as u8)
    }

    pub fn without(self, qop: Qop) -> Self {
        QopSet(self.0 & !(qop as u8))
    }

    pub fn contains(self, qop: Qop) -> bool {
        (self.0 & qop as u8) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Qop> {
        [Qop::Auth, Qop::AuthInt]
            .into_iter()
            .filter(move |&q| self.contains(q))
    }
}

impl std::fmt::Debug for QopSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter().map(Qop::as_str)).finish()
    }
}

impl FromIterator<Qop> for QopSet {
    fn from_iter<I: IntoIterator<Item = Qop>>(iter: I) -> Self {
        iter.into_iter().fold(QopSet::NONE, QopSet::with)
    }
}

/// A `Digest` challenge, as sent in `WWW-Authenticate`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigestChallenge {
    pub realm: String,

    /// URI prefixes the challenge applies to; omitted on the wire when empty.
    pub domain: Vec<String>,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: AlgorithmSession,

    /// Offered qop values; omitted on the wire when empty.
    pub qop: QopSet,

    /// The previous nonce expired but the credentials were otherwise good.
    pub stale: bool,
}

impl DigestChallenge {
    /// Serializes as a `WWW-Authenticate` value.
    pub fn to_header_value(&self) -> String {
        let mut w = ChallengeWriter::new("Digest").quoted("realm", &self.realm);
        if !self.domain.is_empty() {
            w = w.quoted("domain", &self.domain.join(" "));
        }
        w = w.quoted("nonce", &self.nonce);
        if let Some(opaque) = &self.opaque {
            w = w.quoted("opaque", opaque);
        }
        w = w.token("algorithm", self.algorithm.as_str());
        if !self.qop.is_empty() {
            let qop: Vec<&str> = self.qop.iter().map(Qop::as_str).collect();
            w = w.quoted("qop", &qop.join(","));
        }
        if self.stale {
            w = w.token("stale", "true");
        }
        w.finish()
    }
}

impl std::fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

/// `Digest` credentials which could not be understood.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialsError {
    #[error("{0}")]
    Syntax(String),

    #[error("duplicate directive {0:?}")]
    Duplicate(String),

    #[error("missing directive {0:?}")]
    Missing(&'static str),

    #[error(transparent)]
    Qop(#[from] UnknownQop),

    #[error("nc must be 8 hex digits, got {0:?}")]
    InvalidNc(String),

    #[error("auth-int requires the request body")]
    BodyUnavailable,
}

/// Credentials from an `Authorization: Digest ...` header.
///
/// Directive names are matched ignoring ASCII case; unknown directives are
/// ignored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigestCredentials {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub cnonce: Option<String>,
    pub opaque: Option<String>,
    pub qop: Option<Qop>,

    /// Nonce count exactly as sent: 8 hex digits.
    pub nc: Option<String>,

    /// Algorithm token exactly as sent.
    pub algorithm: Option<String>,
}

impl DigestCredentials {
    /// Parses the payload following `Digest `.
    pub fn parse(payload: &str) -> Result<Self, CredentialsError> {
        let mut username = None;
        let mut realm = None;
        let mut nonce = None;
        let mut uri = None;
        let mut response = None;
        let mut cnonce = None;
        let mut opaque = None;
        let mut qop = None;
        let mut nc = None;
        let mut algorithm = None;
        for param in ParamParser::new(payload) {
            let (name, value) = param.map_err(|e| CredentialsError::Syntax(e.to_string()))?;
            let slot: &mut Option<String> = match name.to_ascii_lowercase().as_str() {
                "username" => &mut username,
                "realm" => &mut realm,
                "nonce" => &mut nonce,
                "uri" => &mut uri,
                "response" => &mut response,
                "cnonce" => &mut cnonce,
                "opaque" => &mut opaque,
                "qop" => &mut qop,
                "nc" => &mut nc,
                "algorithm" => &mut algorithm,
                _ => continue,
            };
            if slot.is_some() {
                return Err(CredentialsError::Duplicate(name.to_owned()));
            }
            *slot = Some(value.to_unescaped());
        }
        let qop = qop.as_deref().map(Qop::from_str).transpose()?;
        if let Some(nc) = &nc {
            if nc.len() != 8 || !nc.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(CredentialsError::InvalidNc(nc.clone()));
            }
        }
        Ok(DigestCredentials {
            username: username.ok_or(CredentialsError::Missing("username"))?,
            realm: realm.ok_or(CredentialsError::Missing("realm"))?,
            nonce: nonce.ok_or(CredentialsError::Missing("nonce"))?,
            uri: uri.ok_or(CredentialsError::Missing("uri"))?,
            response: response.ok_or(CredentialsError::Missing("response"))?,
            cnonce,
            opaque,
            qop,
            nc,
            algorithm,
        })
    }

    /// The nonce count as a number.
    pub fn nc_value(&self) -> Option<u32> {
        self.nc
            .as_deref()
            .and_then(|nc| u32::from_str_radix(nc, 16).ok())
    }

    /// Computes the `response` a client knowing `secret` would send.
    ///
    /// `body` is needed only for `qop=auth-int`.
    pub fn expected_response(
        &self,
        algorithm: AlgorithmSession,
        method: &str,
        secret: &Secret,
        body: Option<&[u8]>,
    ) -> Result<String, CredentialsError> {
        let a = algorithm.algorithm;
        let mut ha1 = match secret {
            Secret::Password(p) => a.h(&[
                self.username.as_bytes(),
                self.realm.as_bytes(),
                p.as_bytes(),
            ]),
            Secret::Ha1(ha1) => ha1.to_ascii_lowercase(),
        };
        if algorithm.session {
            let cnonce = self
                .cnonce
                .as_deref()
                .ok_or(CredentialsError::Missing("cnonce"))?;
            ha1 = a.h(&[ha1.as_bytes(), self.nonce.as_bytes(), cnonce.as_bytes()]);
        }
        let ha2 = match self.qop {
            Some(Qop::AuthInt) => {
                let body = body.ok_or(CredentialsError::BodyUnavailable)?;
                let h_body = a.h(&[body]);
                a.h(&[method.as_bytes(), self.uri.as_bytes(), h_body.as_bytes()])
            }
            Some(Qop::Auth) | None => a.h(&[method.as_bytes(), self.uri.as_bytes()]),
        };
        match self.qop {
            None => Ok(a.h(&[ha1.as_bytes(), self.nonce.as_bytes(), ha2.as_bytes()])),
            Some(qop) => {
                let nc = self.nc.as_deref().ok_or(CredentialsError::Missing("nc"))?;
                let cnonce = self
                    .cnonce
                    .as_deref()
                    .ok_or(CredentialsError::Missing("cnonce"))?;
                Ok(a.h(&[
                    ha1.as_bytes(),
                    self.nonce.as_bytes(),
                    nc.as_bytes(),
                    cnonce.as_bytes(),
                    qop.as_str().as_bytes(),
                    ha2.as_bytes(),
                ]))
            }
        }
    }
}

/// A user's credential material.
#[derive(Clone, Eq, PartialEq)]
pub enum Secret {
    /// The plaintext password.
    Password(String),

    /// `H(username:realm:password)` in hex, computed with the strategy's
    /// algorithm and realm, so the application need not store plaintext.
    Ha1(String),
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::Ha1(_) => f.write_str("Ha1(<redacted>)"),
        }
    }
}

/// A user and their secret, as returned by a [`SecretSource`].
#[derive(Clone, Debug)]
pub struct SecretEntry<U> {
    pub user: U,
    pub secret: Secret,

    /// Passed through to [`Outcome::Success`].
    pub info: Option<String>,
}

impl<U> SecretEntry<U> {
    pub fn new(user: U, secret: Secret) -> Self {
        SecretEntry {
            user,
            secret,
            info: None,
        }
    }
}

/// Application callback which looks up a user's secret.
#[async_trait]
pub trait SecretSource: Send + Sync {
    type User: Send;

    /// Returns `Ok(None)` for unknown users.
    async fn secret(&self, username: &str) -> Result<Option<SecretEntry<Self::User>>, BoxError>;
}

/// Directives handed to a [`NonceValidator`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ValidateParams<'a> {
    pub nonce: &'a str,
    pub cnonce: Option<&'a str>,
    pub nc: Option<u32>,
    pub opaque: Option<&'a str>,
}

/// Verdict of a [`NonceValidator`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Validation {
    Valid,
    Invalid,

    /// The nonce has expired; the client is re-challenged with `stale=true`.
    Stale,
}

/// Application callback for nonce replay, nonce count and opaque checks.
///
/// Called only after the response hash matched.
#[async_trait]
pub trait NonceValidator: Send + Sync {
    async fn validate(&self, params: &ValidateParams<'_>) -> Result<Validation, BoxError>;
}

/// Configuration for a [`DigestStrategy`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DigestConfig {
    /// Defaults to `Users`.
    pub realm: String,

    /// URI prefixes protected by this realm. Defaults to empty.
    pub domain: Vec<String>,

    /// Sent in every challenge. Defaults to a random value generated when
    /// the config is created.
    pub opaque: Option<String>,

    /// Defaults to `MD5`.
    pub algorithm: AlgorithmSession,

    /// Offered qop values. Defaults to none.
    pub qop: QopSet,

    /// Remember issued nonces and enforce nonce counts. Defaults to `None`,
    /// leaving replay checks to a [`NonceValidator`].
    pub nonce_tracking: Option<NonceTracking>,
}

impl Default for DigestConfig {
    fn default() -> Self {
        DigestConfig {
            realm: "Users".to_owned(),
            domain: Vec::new(),
            opaque: Some(random_token()),
            algorithm: AlgorithmSession::MD5,
            qop: QopSet::NONE,
            nonce_tracking: None,
        }
    }
}

/// Strategy for the `Digest` scheme.
pub struct DigestStrategy<S> {
    config: DigestConfig,
    secret: S,
    validator: Option<Box<dyn NonceValidator>>,
    nonces: NonceManager,
}

impl<S: SecretSource> DigestStrategy<S> {
    pub fn new(config: DigestConfig, secret: S) -> Self {
        let nonces = match config.nonce_tracking {
            Some(limits) => NonceManager::tracking(limits),
            None => NonceManager::stateless(),
        };
        DigestStrategy {
            config,
            secret,
            validator: None,
            nonces,
        }
    }

    /// Adds a validator consulted after each matching response.
    pub fn with_validator<V: NonceValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    /// The qop values offered for a request; `auth-int` needs the body.
    fn offered_qop(&self, body_available: bool) -> QopSet {
        if body_available {
            self.config.qop
        } else {
            self.config.qop.without(Qop::AuthInt)
        }
    }

    /// Builds a challenge with a fresh nonce.
    pub fn challenge(&self, stale: bool, body_available: bool) -> DigestChallenge {
        DigestChallenge {
            realm: self.config.realm.clone(),
            domain: self.config.domain.clone(),
            nonce: self.nonces.issue(),
            opaque: self.config.opaque.clone(),
            algorithm: self.config.algorithm,
            qop: self.offered_qop(body_available),
            stale,
        }
    }

    /// Checks the parsed directives against the configuration and request.
    fn check_directives(
        &self,
        creds: &DigestCredentials,
        req: &RequestParams<'_>,
    ) -> Result<(), AuthError> {
        let malformed = |m: &str| Err(AuthError::MalformedCredentials(m.to_owned()));
        if let Some(qop) = creds.qop {
            if !self.offered_qop(req.body.is_some()).contains(qop) {
                return malformed("qop was not offered");
            }
            if creds.cnonce.is_none() || creds.nc.is_none() {
                return malformed("qop requires cnonce and nc");
            }
        }
        if self.config.algorithm.session && creds.cnonce.is_none() {
            return malformed("session algorithm requires cnonce");
        }
        if creds.uri != req.uri {
            return malformed("uri does not match the request");
        }
        if creds.realm != self.config.realm {
            debug!("digest: realm {:?} does not match", creds.realm);
            return Err(AuthError::VerificationFailed { stale: false });
        }
        let algorithm = match creds.algorithm.as_deref() {
            None => Ok(AlgorithmSession::MD5),
            Some(a) => a.parse::<AlgorithmSession>(),
        };
        if algorithm != Ok(self.config.algorithm) {
            debug!("digest: algorithm {:?} not accepted", creds.algorithm);
            return Err(AuthError::VerificationFailed { stale: false });
        }
        Ok(())
    }

    async fn verify_request(
        &self,
        req: &RequestParams<'_>,
    ) -> Result<SecretEntry<S::User>, AuthError> {
        let malformed = |e: &dyn std::fmt::Display| AuthError::MalformedCredentials(e.to_string());
        let value = match req.authorization {
            Some(v) if !v.trim_matches(|c| c == ' ' || c == '\t').is_empty() => v,
            _ => return Err(AuthError::NoCredentials),
        };
        let parsed = parse_credentials(value).map_err(|e| malformed(&e))?;
        if parsed.payload.is_empty() {
            return Err(malformed(&"credentials have no payload"));
        }
        if !parsed.is_scheme("Digest") {
            return Err(AuthError::NoCredentials);
        }
        let creds = DigestCredentials::parse(parsed.payload).map_err(|e| malformed(&e))?;
        self.check_directives(&creds, req)?;

        let entry = self
            .secret
            .secret(&creds.username)
            .await
            .map_err(AuthError::Upstream)?;

        // Unknown users are hashed against a placeholder so both paths cost
        // the same.
        let placeholder = Secret::Password(String::new());
        let secret = entry.as_ref().map_or(&placeholder, |e| &e.secret);
        let expected = creds
            .expected_response(self.config.algorithm, req.method, secret, req.body)
            .map_err(|e| malformed(&e))?;
        let actual = creds.response.to_ascii_lowercase();
        let response_ok = bool::from(expected.as_bytes().ct_eq(actual.as_bytes()));
        let entry = match entry {
            Some(entry) if response_ok => entry,
            Some(_) => {
                debug!("digest: response mismatch for {:?}", creds.username);
                return Err(AuthError::VerificationFailed { stale: false });
            }
            None => {
                debug!("digest: no secret for {:?}", creds.username);
                return Err(AuthError::VerificationFailed { stale: false });
            }
        };

        match self.nonces.check(&creds.nonce, creds.nc_value()) {
            NonceStatus::Fresh => {}
            NonceStatus::Stale => return Err(AuthError::VerificationFailed { stale: true }),
            NonceStatus::Replayed => return Err(AuthError::VerificationFailed { stale: false }),
        }

        if let Some(validator) = &self.validator {
            let params = ValidateParams {
                nonce: &creds.nonce,
                cnonce: creds.cnonce.as_deref(),
                nc: creds.nc_value(),
                opaque: creds.opaque.as_deref(),
            };
            match validator.validate(&params).await {
                Ok(Validation::Valid) => {}
                Ok(Validation::Invalid) => {
                    debug!("digest: validator rejected nonce {:?}", creds.nonce);
                    return Err(AuthError::VerificationFailed { stale: false });
                }
                Ok(Validation::Stale) => return Err(AuthError::VerificationFailed { stale: true }),
                Err(e) => return Err(AuthError::Upstream(e)),
            }
        }
        Ok(entry)
    }
}

#[async_trait]
impl<S: SecretSource> Strategy for DigestStrategy<S> {
    type User = S::User;

    fn name(&self) -> &'static str {
        "digest"
    }

    async fn authenticate(&self, req: &RequestParams<'_>) -> Outcome<S::User> {
        match self.verify_request(req).await {
            Ok(SecretEntry { user, info, .. }) => Outcome::Success { user, info },
            Err(e) => {
                debug!("digest: {}", e);
                Outcome::from_error(e, |stale| {
                    self.challenge(stale, req.body.is_some()).to_header_value()
                })
            }
        }
    }
}
