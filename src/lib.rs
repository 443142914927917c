// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side HTTP authentication strategies.
//!
//! Each strategy inspects the `Authorization` header of one request, consults
//! an application callback (user directory, password store), and resolves the
//! attempt into exactly one [`Outcome`]: success, fail (with a
//! `WWW-Authenticate` challenge or a `400`), error, or pass.
//!
//! As described in the following documents and specifications:
//!
//! *   [RFC 7235](https://datatracker.ietf.org/doc/html/rfc7235):
//!     Hypertext Transfer Protocol (HTTP/1.1): Authentication.
//! *   [RFC 7617](https://datatracker.ietf.org/doc/html/rfc7617):
//!     The 'Basic' HTTP Authentication Scheme
//! *   [RFC 2617](https://datatracker.ietf.org/doc/html/rfc2617) and
//!     [RFC 7616](https://datatracker.ietf.org/doc/html/rfc7616):
//!     HTTP Digest Access Authentication
//!
//! Quick example:
//!
//! ```rust
//! use http_auth_strategies::basic::{BasicConfig, BasicStrategy, Verified, Verify};
//! use http_auth_strategies::{BoxError, Outcome, RequestParams, Strategy};
//!
//! struct Directory;
//!
//! #[async_trait::async_trait]
//! impl Verify for Directory {
//!     type User = String;
//!
//!     async fn verify(
//!         &self,
//!         _request: Option<&RequestParams<'_>>,
//!         username: &str,
//!         password: &str,
//!     ) -> Result<Option<Verified<String>>, BoxError> {
//!         Ok((username == "Aladdin" && password == "open sesame")
//!             .then(|| Verified::new(username.to_owned())))
//!     }
//! }
//!
//! let strategy = BasicStrategy::new(BasicConfig::default(), Directory);
//! let req = RequestParams {
//!     method: "GET",
//!     uri: "/",
//!     authorization: Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="),
//!     body: None,
//! };
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let outcome = rt.block_on(strategy.authenticate(&req));
//! assert!(matches!(outcome, Outcome::Success { user, .. } if user == "Aladdin"));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

use std::borrow::Cow;

use async_trait::async_trait;

pub mod header;
pub mod outcome;
pub mod parser;
mod table;

#[cfg(feature = "basic-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "basic-scheme")))]
pub mod basic;

#[cfg(feature = "digest-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "digest-scheme")))]
pub mod digest;

#[cfg(feature = "digest-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "digest-scheme")))]
pub mod nonce;

pub use outcome::{AuthError, Dispatcher, Failure, Once, Outcome};
pub use parser::ParamParser;

#[cfg(feature = "basic-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "basic-scheme")))]
pub use crate::basic::BasicStrategy;

#[cfg(feature = "digest-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "digest-scheme")))]
pub use crate::digest::DigestStrategy;

/// Error type returned by application callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The parts of a request a strategy looks at.
///
/// This is cheap to construct; hosts generally build a fresh `RequestParams`
/// for each request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RequestParams<'a> {
    /// The HTTP method, such as `GET`.
    pub method: &'a str,

    /// The Request-URI as it appeared in the request line. `Digest`
    /// credentials must name this same URI.
    pub uri: &'a str,

    /// The `Authorization` header value, if present.
    pub authorization: Option<&'a str>,

    /// The entity body, if available. Use `Some(&[])` for requests with no
    /// body.
    ///
    /// When `None`, `Digest` challenges will not offer
    /// [`crate::digest::Qop::AuthInt`].
    pub body: Option<&'a [u8]>,
}

/// The `Authorization` header of an [`http::Request`] was not UTF-8.
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
#[derive(Debug, thiserror::Error)]
#[error("Authorization header is not valid UTF-8")]
pub struct NonUtf8Authorization;

/// Borrows the request line, `Authorization` header and body.
///
/// Hosts should answer `400` on error.
#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
impl<'a, B: AsRef<[u8]>> TryFrom<&'a http::Request<B>> for RequestParams<'a> {
    type Error = NonUtf8Authorization;

    fn try_from(req: &'a http::Request<B>) -> Result<Self, Self::Error> {
        let authorization = match req.headers().get(http::header::AUTHORIZATION) {
            Some(v) => Some(std::str::from_utf8(v.as_bytes()).map_err(|_| NonUtf8Authorization)?),
            None => None,
        };
        Ok(RequestParams {
            method: req.method().as_str(),
            uri: req
                .uri()
                .path_and_query()
                .map(http::uri::PathAndQuery::as_str)
                .unwrap_or("/"),
            authorization,
            body: Some(AsRef::<[u8]>::as_ref(req.body())),
        })
    }
}

/// An authentication strategy for one scheme.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The application's user type, produced on success.
    type User: Send;

    /// A short lowercase name, such as `basic`.
    fn name(&self) -> &'static str;

    /// Verifies the request's credentials.
    async fn authenticate(&self, req: &RequestParams<'_>) -> Outcome<Self::User>;

    /// Verifies the request's credentials and delivers the outcome to
    /// `dispatcher`.
    async fn authenticate_with<D>(&self, req: &RequestParams<'_>, dispatcher: &mut Once<D>)
    where
        D: Dispatcher<Self::User> + Send,
    {
        self.authenticate(req).await.dispatch(dispatcher);
    }
}

/// A parsed `auth-param`: name and value, borrowed from the header.
pub type ParamRef<'i> = (&'i str, ParamValue<'i>);

/// Parsed parameter value.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ParamValue<'i> {
    /// The number of backslash escapes in a quoted-text parameter; 0 for a plain token.
    escapes: usize,

    /// The raw string between the quotes, which must be consistent with `escapes`.
    raw: &'i str,
}

impl<'i> ParamValue<'i> {
    /// Creates a new param, panicking if invariants are not satisfied.
    /// This not part of the stable API; it's just for the fuzz tester to use.
    #[doc(hidden)]
    pub fn new(escapes: usize, raw: &'i str) -> Self {
        let mut pos = 0;
        for escape in 0..escapes {
            match memchr::memchr(b'\\', &raw.as_bytes()[pos..]) {
                Some(rel_pos) => pos += rel_pos + 2,
                None => panic!(
                    "expected {} backslashes in {:?}, ran out after {}",
                    escapes, raw, escape
                ),
            };
        }
        if memchr::memchr(b'\\', &raw.as_bytes()[pos..]).is_some() {
            panic!("expected {} backslashes in {:?}, are more", escapes, raw);
        }
        ParamValue { escapes, raw }
    }

    /// Appends the unescaped form of this parameter to the supplied string.
    fn append_unescaped(&self, to: &mut String) {
        to.reserve(self.raw.len() - self.escapes);
        let mut first_unwritten = 0;
        for _ in 0..self.escapes {
            let i = match memchr::memchr(b'\\', &self.raw.as_bytes()[first_unwritten..]) {
                Some(rel_i) => first_unwritten + rel_i,
                None => panic!("bad ParamValues; not as many backslash escapes as promised"),
            };
            to.push_str(&self.raw[first_unwritten..i]);
            to.push_str(&self.raw[i + 1..i + 2]);
            first_unwritten = i + 2;
        }
        to.push_str(&self.raw[first_unwritten..]);
    }

    /// Returns the unescaped length of this parameter; cheap.
    #[inline]
    pub fn unescaped_len(&self) -> usize {
        self.raw.len() - self.escapes
    }

    /// Returns the unescaped form of this parameter as a fresh `String`.
    pub fn to_unescaped(&self) -> String {
        let mut to = String::new();
        self.append_unescaped(&mut to);
        to
    }

    /// Returns the unescaped form, borrowing from the header when there is
    /// nothing to unescape.
    pub fn as_unescaped(&self) -> Cow<'i, str> {
        if self.escapes == 0 {
            Cow::Borrowed(self.raw)
        } else {
            Cow::Owned(self.to_unescaped())
        }
    }
}

impl<'i> std::fmt::Debug for ParamValue<'i> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use crate::ParamValue;
    use std::borrow::Cow;

    #[test]
    fn unescape() {
        assert_eq!(&ParamValue::new(0, "").to_unescaped(), "");
        assert_eq!(&ParamValue::new(0, "foo").to_unescaped(), "foo");
        assert_eq!(&ParamValue::new(1, "\\foo").to_unescaped(), "foo");
        assert_eq!(&ParamValue::new(1, "fo\\o").to_unescaped(), "foo");
        assert_eq!(&ParamValue::new(1, "foo\\bar").to_unescaped(), "foobar");
        assert_eq!(&ParamValue::new(3, "\\foo\\ba\\r").to_unescaped(), "foobar");
        assert_eq!(&ParamValue::new(1, "J\\\"äsøn").to_unescaped(), "J\"äsøn");
        assert_eq!(ParamValue::new(3, "\\foo\\ba\\r").unescaped_len(), 6);
    }

    #[test]
    fn as_unescaped_borrows_when_possible() {
        assert!(matches!(
            ParamValue::new(0, "foo").as_unescaped(),
            Cow::Borrowed("foo")
        ));
        assert!(matches!(
            ParamValue::new(1, "f\\oo").as_unescaped(),
            Cow::Owned(s) if s == "foo"
        ));
    }

    #[test]
    #[should_panic]
    fn new_checks_escapes() {
        ParamValue::new(2, "\\foo");
    }

    #[cfg(feature = "http")]
    #[test]
    fn request_params_from_http() {
        let req = http::Request::builder()
            .method("POST")
            .uri("http://example.com/dir/index.html?x=1")
            .header("Authorization", "Basic Ym9iOnNlY3JldA==")
            .body(b"hello".to_vec())
            .unwrap();
        let params = crate::RequestParams::try_from(&req).unwrap();
        assert_eq!(params.method, "POST");
        assert_eq!(params.uri, "/dir/index.html?x=1");
        assert_eq!(params.authorization, Some("Basic Ym9iOnNlY3JldA=="));
        assert_eq!(params.body, Some(&b"hello"[..]));
    }
}
