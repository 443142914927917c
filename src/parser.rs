// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hand-written parser for `Authorization` header values.
//!
//! Follows the `credentials` rule of
//! [RFC 7235 section 2.1](https://datatracker.ietf.org/doc/html/rfc7235#section-2.1):
//!
//! ```text
//! credentials = auth-scheme [ 1*SP ( token68 / #auth-param ) ]
//! auth-param  = token BWS "=" BWS ( token / quoted-string )
//! ```
//!
//! Splitting the scheme from its payload is done by [`parse_credentials`];
//! the payload is then interpreted by the strategy for that scheme. `Basic`
//! treats it as a `token68`; `Digest` walks it with [`ParamParser`].
//!
//! Some functional differences from the ABNF:
//!
//! *   Leading and trailing optional whitespace around the whole value is
//!     ignored.
//! *   Quoted strings accept `obs-text`, so UTF-8 usernames survive.
//! *   Empty list elements (`a=1,,b=2`) are skipped, as
//!     [RFC 7230 section 7](https://datatracker.ietf.org/doc/html/rfc7230#section-7)
//!     requires of recipients.

use crate::table::{char_classes, C_ESCAPABLE, C_OWS, C_QDTEXT, C_TCHAR, C_TOKEN68};
use crate::{ParamRef, ParamValue};

#[cfg(feature = "trace")]
macro_rules! trace {
    ($($arg:tt)+) => (log::trace!($($arg)+));
}

#[cfg(not(feature = "trace"))]
macro_rules! trace {
    ($($arg:tt)+) => {};
}

/// Parse error, with the position at which parsing gave up.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Error<'i> {
    input: &'i str,
    pos: usize,
    error: &'static str,
}

impl<'i> Error<'i> {
    fn new(input: &'i str, pos: usize, error: &'static str) -> Self {
        trace!("parse error {:?} at byte {} of {:?}", error, pos, input);
        Error { input, pos, error }
    }

    /// The byte offset into the input at which the error was detected.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl<'i> std::fmt::Debug for Error<'i> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl<'i> std::fmt::Display for Error<'i> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at byte {}: {:?}",
            self.error,
            self.pos,
            format!(
                "{}(HERE-->){}",
                &self.input[..self.pos],
                &self.input[self.pos..]
            )
        )
    }
}

impl<'i> std::error::Error for Error<'i> {}

/// `Authorization` value split into its scheme and (unparsed) payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CredentialsRef<'i> {
    /// The scheme name, which should be compared case-insensitively.
    pub scheme: &'i str,

    /// Everything after the separating spaces, with trailing whitespace
    /// removed. May be empty.
    pub payload: &'i str,
}

impl<'i> CredentialsRef<'i> {
    /// Returns true if this uses the given scheme, ignoring ASCII case.
    #[inline]
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }
}

#[inline]
fn skip_ows(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (char_classes(bytes[pos]) & C_OWS) != 0 {
        pos += 1;
    }
    pos
}

#[inline]
fn skip_class(bytes: &[u8], mut pos: usize, class: u8) -> usize {
    while pos < bytes.len() && (char_classes(bytes[pos]) & class) != 0 {
        pos += 1;
    }
    pos
}

/// Splits an `Authorization` header value into scheme and payload.
///
/// ```rust
/// use http_auth_strategies::parser::parse_credentials;
/// let c = parse_credentials("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==").unwrap();
/// assert!(c.is_scheme("basic"));
/// assert_eq!(c.payload, "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
/// ```
pub fn parse_credentials(input: &str) -> Result<CredentialsRef<'_>, Error<'_>> {
    let bytes = input.as_bytes();
    let start = skip_ows(bytes, 0);
    let scheme_end = skip_class(bytes, start, C_TCHAR);
    if scheme_end == start {
        return Err(Error::new(input, start, "expected auth-scheme token"));
    }
    let scheme = &input[start..scheme_end];
    let mut pos = scheme_end;
    while pos < bytes.len() && bytes[pos] == b' ' {
        pos += 1;
    }
    let payload = input[pos..].trim_end_matches(|c| c == ' ' || c == '\t');
    if pos == scheme_end && !payload.is_empty() {
        return Err(Error::new(input, pos, "expected SP after auth-scheme"));
    }
    trace!("scheme {:?} payload {:?}", scheme, payload);
    Ok(CredentialsRef { scheme, payload })
}

/// Returns true if `input` is a non-empty `token68`.
pub fn is_token68(input: &str) -> bool {
    let bytes = input.as_bytes();
    let body_end = skip_class(bytes, 0, C_TOKEN68);
    body_end > 0 && bytes[body_end..].iter().all(|&b| b == b'=')
}

/// Iterator over the `#auth-param` list of a credentials payload.
///
/// Stops after the first error.
///
/// ```rust
/// use http_auth_strategies::parser::ParamParser;
/// let mut p = ParamParser::new(r#"username="Mufasa", nc=00000001"#);
/// let (k, v) = p.next().unwrap().unwrap();
/// assert_eq!((k, v.to_unescaped().as_str()), ("username", "Mufasa"));
/// let (k, v) = p.next().unwrap().unwrap();
/// assert_eq!((k, v.to_unescaped().as_str()), ("nc", "00000001"));
/// assert!(p.next().is_none());
/// ```
pub struct ParamParser<'i> {
    input: &'i str,
    pos: usize,
    failed: bool,
}

impl<'i> ParamParser<'i> {
    pub fn new(input: &'i str) -> Self {
        ParamParser {
            input,
            pos: 0,
            failed: false,
        }
    }

    fn fail(&mut self, error: &'static str) -> Option<Result<ParamRef<'i>, Error<'i>>> {
        self.failed = true;
        Some(Err(Error::new(self.input, self.pos, error)))
    }

    /// Parses a quoted-string starting at the opening `"`.
    fn quoted_string(&mut self) -> Result<ParamValue<'i>, &'static str> {
        let bytes = self.input.as_bytes();
        debug_assert_eq!(bytes[self.pos], b'"');
        self.pos += 1;
        let start = self.pos;
        let mut escapes = 0;
        loop {
            let b = match bytes.get(self.pos) {
                None => return Err("unterminated quoted-string"),
                Some(&b) => b,
            };
            trace!("quoted_string byte {:?} at {}", char::from(b), self.pos);
            match b {
                b'"' => break,
                b'\\' => match bytes.get(self.pos + 1) {
                    Some(&e) if (char_classes(e) & C_ESCAPABLE) != 0 => {
                        escapes += 1;
                        self.pos += 2;
                    }
                    _ => return Err("invalid quoted-pair"),
                },
                _ if (char_classes(b) & C_QDTEXT) != 0 => self.pos += 1,
                _ => return Err("invalid byte in quoted-string"),
            }
        }
        let raw = &self.input[start..self.pos];
        self.pos += 1;
        Ok(ParamValue { escapes, raw })
    }
}

impl<'i> Iterator for ParamParser<'i> {
    type Item = Result<ParamRef<'i>, Error<'i>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let bytes = self.input.as_bytes();

        // *( "," OWS ) between (and around) elements.
        loop {
            self.pos = skip_ows(bytes, self.pos);
            if self.pos < bytes.len() && bytes[self.pos] == b',' {
                self.pos += 1;
                continue;
            }
            break;
        }
        if self.pos == bytes.len() {
            return None;
        }

        let name_start = self.pos;
        self.pos = skip_class(bytes, self.pos, C_TCHAR);
        if self.pos == name_start {
            return self.fail("expected auth-param name");
        }
        let name = &self.input[name_start..self.pos];

        self.pos = skip_ows(bytes, self.pos);
        if bytes.get(self.pos) != Some(&b'=') {
            return self.fail("expected '=' after auth-param name");
        }
        self.pos = skip_ows(bytes, self.pos + 1);

        let value = if bytes.get(self.pos) == Some(&b'"') {
            match self.quoted_string() {
                Ok(v) => v,
                Err(e) => return self.fail(e),
            }
        } else {
            let value_start = self.pos;
            self.pos = skip_class(bytes, self.pos, C_TCHAR);
            if self.pos == value_start {
                return self.fail("expected token or quoted-string value");
            }
            ParamValue {
                escapes: 0,
                raw: &self.input[value_start..self.pos],
            }
        };

        self.pos = skip_ows(bytes, self.pos);
        if self.pos < bytes.len() && bytes[self.pos] != b',' {
            return self.fail("expected ',' after auth-param");
        }
        trace!("param {:?} = {:?}", name, value);
        Some(Ok((name, value)))
    }
}

impl<'i> std::iter::FusedIterator for ParamParser<'i> {}

/// Parses a whole `#auth-param` list into a `Vec`.
///
/// This is a shorthand for `ParamParser::new(input).collect()`.
#[inline]
pub fn parse_params(input: &str) -> Result<Vec<ParamRef<'_>>, Error<'_>> {
    ParamParser::new(input).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn credentials() {
        assert_eq!(
            parse_credentials("Basic Ym9iOnNlY3JldA==").unwrap(),
            CredentialsRef {
                scheme: "Basic",
                payload: "Ym9iOnNlY3JldA=="
            }
        );
        assert_eq!(
            parse_credentials("  Digest   a=b  ").unwrap(),
            CredentialsRef {
                scheme: "Digest",
                payload: "a=b"
            }
        );
        assert_eq!(
            parse_credentials("Basic").unwrap(),
            CredentialsRef {
                scheme: "Basic",
                payload: ""
            }
        );
        assert_eq!(
            parse_credentials("Basic ").unwrap(),
            CredentialsRef {
                scheme: "Basic",
                payload: ""
            }
        );
        assert!(parse_credentials("").is_err());
        assert!(parse_credentials("   ").is_err());
        assert!(parse_credentials("Basic\"x\"").is_err());
        assert_eq!(parse_credentials("\"Basic").unwrap_err().pos(), 0);
    }

    #[test]
    fn token68() {
        assert!(is_token68("Ym9iOnNlY3JldA=="));
        assert!(is_token68("abc-._~+/"));
        assert!(!is_token68(""));
        assert!(!is_token68("=="));
        assert!(!is_token68("*****"));
        assert!(!is_token68("ab=c"));
        assert!(!is_token68("ab c"));
    }

    #[test]
    fn params() {
        let params = parse_params(
            r#"username="Mufasa", realm="testrealm@host.com", qop=auth, nc=00000001"#,
        )
        .unwrap();
        assert_eq!(
            params,
            vec![
                ("username", ParamValue::new(0, "Mufasa")),
                ("realm", ParamValue::new(0, "testrealm@host.com")),
                ("qop", ParamValue::new(0, "auth")),
                ("nc", ParamValue::new(0, "00000001")),
            ]
        );
    }

    #[test]
    fn params_relaxed_list() {
        assert_eq!(
            parse_params(",  a = 1 ,, b=\"x\" ,").unwrap(),
            vec![("a", ParamValue::new(0, "1")), ("b", ParamValue::new(0, "x"))]
        );
        assert_eq!(parse_params("").unwrap(), vec![]);
        assert_eq!(parse_params(" , ,").unwrap(), vec![]);
    }

    #[test]
    fn params_escapes_and_utf8() {
        let params = parse_params(r#"username="J\"ason", realm="Jäsøn""#).unwrap();
        assert_eq!(params[0].1.to_unescaped(), "J\"ason");
        assert_eq!(params[1].1.to_unescaped(), "Jäsøn");
    }

    #[test]
    fn params_errors() {
        for bad in [
            "a",
            "a=",
            "=b",
            "a=\"unterminated",
            "a=b c=d",
            "a=\"x\\\u{e4}\"",
            "a=\"x\"y",
        ] {
            assert!(parse_params(bad).is_err(), "{:?} should fail", bad);
        }
    }

    #[test]
    fn stops_after_error() {
        let mut p = ParamParser::new("a=1, =, b=2");
        assert!(p.next().unwrap().is_ok());
        assert!(p.next().unwrap().is_err());
        assert!(p.next().is_none());
    }

    #[test]
    fn error_display() {
        let e = parse_params("a=1 b").unwrap_err();
        assert_eq!(
            e.to_string(),
            "expected ',' after auth-param at byte 4: \"a=1 (HERE-->)b\""
        );
    }
}
