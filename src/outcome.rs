// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verification outcomes and their delivery to the host pipeline.
//!
//! A strategy resolves every attempt into exactly one [`Outcome`]. Hosts
//! either consume the value directly or have it delivered through a
//! [`Dispatcher`]; [`Once`] enforces that at most one notification reaches
//! the host even if a caller misbehaves.

use log::warn;

use crate::BoxError;

/// `401 Unauthorized`: a challenge accompanies the failure.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// `400 Bad Request`: credentials were supplied but could not be understood.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// A failed attempt, as reported to the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Failure {
    /// The `WWW-Authenticate` value to send, if any.
    pub challenge: Option<String>,
    pub status: u16,
}

impl Failure {
    /// A `401` carrying the given challenge.
    pub fn unauthorized(challenge: String) -> Self {
        Failure {
            challenge: Some(challenge),
            status: STATUS_UNAUTHORIZED,
        }
    }

    /// A `400` with no challenge.
    pub fn bad_request() -> Self {
        Failure {
            challenge: None,
            status: STATUS_BAD_REQUEST,
        }
    }

    /// The status as an [`http::StatusCode`].
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub fn status_code(&self) -> http::StatusCode {
        http::StatusCode::from_u16(self.status).unwrap_or(http::StatusCode::UNAUTHORIZED)
    }

    /// The challenge as a `WWW-Authenticate` [`http::HeaderValue`].
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub fn header_value(&self) -> Option<http::HeaderValue> {
        self.challenge
            .as_deref()
            .and_then(|c| http::HeaderValue::from_bytes(c.as_bytes()).ok())
    }
}

/// The result of one authentication attempt.
///
/// Exactly one variant is produced per attempt, and it is consumed once.
#[derive(Debug)]
pub enum Outcome<U> {
    /// The caller is `user`. `info` is optional application data supplied by
    /// the verify/secret callback.
    Success { user: U, info: Option<String> },

    Fail(Failure),

    /// An internal error, such as an unavailable user directory. Hosts
    /// typically answer `500`.
    Error(BoxError),

    /// The strategy declines to judge; the host keeps any prior
    /// authentication state. The built-in strategies never produce this.
    Pass,
}

impl<U> Outcome<U> {
    /// Resolves an [`AuthError`] into an outcome. `challenge` is called with
    /// the `stale` flag when the error calls for a fresh challenge.
    pub fn from_error<F>(err: AuthError, challenge: F) -> Self
    where
        F: FnOnce(bool) -> String,
    {
        match err {
            AuthError::NoCredentials => Outcome::Fail(Failure::unauthorized(challenge(false))),
            AuthError::VerificationFailed { stale } => {
                Outcome::Fail(Failure::unauthorized(challenge(stale)))
            }
            AuthError::MalformedCredentials(_) => Outcome::Fail(Failure::bad_request()),
            AuthError::Upstream(e) => Outcome::Error(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Returns the failure, if this is a [`Outcome::Fail`].
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Fail(f) => Some(f),
            _ => None,
        }
    }

    /// Delivers this outcome as exactly one notification.
    pub fn dispatch<D: Dispatcher<U> + ?Sized>(self, dispatcher: &mut D) {
        match self {
            Outcome::Success { user, info } => dispatcher.success(user, info),
            Outcome::Fail(Failure { challenge, status }) => dispatcher.fail(challenge, status),
            Outcome::Error(e) => dispatcher.error(e),
            Outcome::Pass => dispatcher.pass(),
        }
    }
}

/// The four notification points a host exposes to a strategy.
///
/// Exactly one must be invoked per attempt. Invoking none, or more than one,
/// is a contract violation; wrap implementations in [`Once`] to guard against
/// the latter.
pub trait Dispatcher<U> {
    fn success(&mut self, user: U, info: Option<String>);
    fn fail(&mut self, challenge: Option<String>, status: u16);
    fn error(&mut self, cause: BoxError);
    fn pass(&mut self);
}

/// Forwards only the first notification to the wrapped dispatcher.
#[derive(Debug)]
pub struct Once<D> {
    inner: D,
    complete: bool,
}

impl<D> Once<D> {
    pub fn new(inner: D) -> Self {
        Once {
            inner,
            complete: false,
        }
    }

    /// Returns true once a notification has been forwarded.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn into_inner(self) -> D {
        self.inner
    }

    fn begin(&mut self, kind: &str) -> bool {
        if self.complete {
            warn!("ignoring {} notification after the attempt completed", kind);
            return false;
        }
        self.complete = true;
        true
    }
}

impl<U, D: Dispatcher<U>> Dispatcher<U> for Once<D> {
    fn success(&mut self, user: U, info: Option<String>) {
        if self.begin("success") {
            self.inner.success(user, info);
        }
    }

    fn fail(&mut self, challenge: Option<String>, status: u16) {
        if self.begin("fail") {
            self.inner.fail(challenge, status);
        }
    }

    fn error(&mut self, cause: BoxError) {
        if self.begin("error") {
            self.inner.error(cause);
        }
    }

    fn pass(&mut self) {
        if self.begin("pass") {
            self.inner.pass();
        }
    }
}

/// Why an attempt did not succeed, before it is resolved into an [`Outcome`].
///
/// The details carried here are for logs only; none of them reach the
/// client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization` header, or one for another scheme.
    #[error("no credentials for this scheme")]
    NoCredentials,

    #[error("malformed credentials: {0}")]
    MalformedCredentials(String),

    /// Credentials were understood but did not verify. `stale` asks the
    /// client to retry with a fresh nonce without prompting the user.
    #[error("verification failed (stale={stale})")]
    VerificationFailed { stale: bool },

    /// A secret, verify or validate callback failed.
    #[error("upstream callback failed: {0}")]
    Upstream(#[source] BoxError),
}
