// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! nom-based parser which is a fairly straightforward translation of the ABNF
//! from [RFC 7235](https://datatracker.ietf.org/doc/html/rfc7235):
//!
//! *   Some functional differences are noted in
//!     [`http_auth_strategies::parser`]; they are mirrored here.
//! *   The payload is split off as a whole by `credentials` and parsed as
//!     `#auth-param` separately by `params`, as the hand parser does.

use log::trace;
use nom::branch::alt;
use nom::bytes::complete::is_a;
use nom::character::complete::{char, satisfy};
use nom::combinator::{all_consuming, consumed, eof, map, rest, value};
use nom::multi::{fold_many0, many0_count, many1, many1_count, separated_list0};
use nom::sequence::{delimited, pair, preceded, separated_pair, tuple};

use http_auth_strategies::parser::CredentialsRef;
use http_auth_strategies::{ParamRef, ParamValue};

/// Parses optional whitespace as in [RFC 7230 section 3.2.3](https://datatracker.ietf.org/doc/html/rfc7230#section-3.2.3).
///
/// ```text
///      OWS            = *( SP / HTAB )
///                     ; optional whitespace
/// ```
use nom::character::complete::space0 as ows;

/// Parses "bad" whitespace as in [RFC 7230 section 3.2.3](https://datatracker.ietf.org/doc/html/rfc7230#section-3.2.3).
///
/// This is functionally identical to `ows`.
use nom::character::complete::space0 as bws;

/// Parses a token as in RFC 7230 section 3.2.6.
///
/// ```text
///      token          = 1*tchar
///
///      tchar          = "!" / "#" / "$" / "%" / "&" / "'" / "*"
///                     / "+" / "-" / "." / "^" / "_" / "`" / "|" / "~"
///                     / DIGIT / ALPHA
///                     ; any VCHAR, except delimiters
/// ```
fn token(input: &str) -> nom::IResult<&str, &str> {
    trace!("token attempt on {:?}", input);
    is_a("!#$%&'*+-.^_`|~0123456789abcdefghijklmnopqrstuvxwyzABCDEFGHIJKLMNOPQRSTUVWXYZ")(input)
}

/// Parses `quoted-string` as in [RFC 7230 section 3.2.6](https://datatracker.ietf.org/doc/html/rfc7230#section-3.2.6).
///
/// ```text
/// quoted-string  = DQUOTE *( qdtext / quoted-pair ) DQUOTE
/// qdtext         = HTAB / SP /%x21 / %x23-5B / %x5D-7E / obs-text
/// obs-text       = %x80-FF
/// quoted-pair    = "\" ( HTAB / SP / VCHAR / obs-text )
/// VCHAR          =  %x21-7E
///                ; visible (printing) characters
/// ```
///
/// `obs-text` is accepted in `qdtext` (so UTF-8 survives) but not after a
/// backslash.
fn quoted_string(input: &str) -> nom::IResult<&str, ParamValue> {
    trace!("quoted_string attempt on {:?}", input);
    let is_qdtext = |c| {
        matches!(c, '\t' | ' ' | '\x21' | '\x23'..='\x5B' | '\x5D'..='\x7E' | '\u{80}'..)
    };
    let is_escapable = |c| matches!(c, '\t' | ' ' | '\x21'..='\x7E');
    delimited(
        char('"'),
        map(
            consumed(fold_many0(
                alt((
                    value(0, many1(satisfy(is_qdtext))),
                    value(1, pair(char('\\'), satisfy(is_escapable))),
                )),
                || 0,
                |acc: usize, item: usize| acc + item,
            )),
            |(raw, escapes)| ParamValue::new(escapes, raw),
        ),
        char('"'),
    )(input)
}

/// Parses `auth-param` as in [RFC 7235 section
/// 2.1](https://datatracker.ietf.org/doc/html/rfc7235#section-2.1).
///
/// ```text
///   auth-param = token BWS "=" BWS ( token / quoted-string )
/// ```
fn auth_param(input: &str) -> nom::IResult<&str, ParamRef> {
    trace!("auth_param attempt on {:?}", input);
    separated_pair(
        token,
        tuple((bws, char('='), bws)),
        alt((map(token, |raw| ParamValue::new(0, raw)), quoted_string)),
    )(input)
}

/// Parses `#element` as defined in [RFC 7230 section 7](https://datatracker.ietf.org/doc/html/rfc7230#section-7),
/// additionally allowing whitespace before the leading commas.
///
/// > A recipient MUST accept lists that satisfy the following syntax:
/// > ```text
/// > #element => [ ( "," / element ) *( OWS "," [ OWS element ] ) ]
/// > ```
fn list0_relaxed<'i, O, F>(f: F) -> impl FnMut(&'i str) -> nom::IResult<&'i str, Vec<O>>
where
    F: nom::Parser<&'i str, O, nom::error::Error<&'i str>>,
{
    delimited(
        // OWS *( "," OWS )
        preceded(ows, many0_count(pair(char(','), ows))),
        // [ element *( OWS 1*( "," OWS ) element ) ]
        separated_list0(pair(ows, many1_count(pair(char(','), ows))), f),
        // OWS *( "," OWS )
        preceded(ows, many0_count(pair(char(','), ows))),
    )
}

/// Parses a whole credentials payload as `#auth-param`.
pub fn params(input: &str) -> nom::IResult<&str, Vec<ParamRef>> {
    all_consuming(list0_relaxed(auth_param))(input)
}

/// Splits credentials as in [RFC 7235 section 2.1].
///
/// ```text
/// credentials = auth-scheme [ 1*SP ( token68 / #auth-param ) ]
/// ```
///
/// The payload is taken as-is, minus trailing `OWS`, and may be empty.
/// Leading `OWS` is skipped.
pub fn credentials(input: &str) -> nom::IResult<&str, CredentialsRef> {
    trace!("credentials attempt on {:?}", input);
    map(
        preceded(
            ows,
            pair(
                token,
                alt((
                    preceded(many1_count(char(' ')), rest),
                    value("", pair(ows, eof)),
                )),
            ),
        ),
        |(scheme, payload): (&str, &str)| CredentialsRef {
            scheme,
            payload: payload.trim_end_matches(|c| c == ' ' || c == '\t'),
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use nom::error::{Error, ErrorKind};
    use nom::Err;

    use super::*;

    #[test]
    fn test_quoted_string() {
        assert_eq!(
            quoted_string(&r#""foo""#),
            Ok(("", ParamValue::new(0, "foo")))
        );
        assert_eq!(
            quoted_string(&r#""foo \" bar""#),
            Ok(("", ParamValue::new(1, r#"foo \" bar"#))),
        );
        assert_eq!(
            quoted_string(r#""Jäsøn""#),
            Ok(("", ParamValue::new(0, "Jäsøn")))
        );
        assert_eq!(quoted_string(r#""""#), Ok(("", ParamValue::new(0, ""))));
        assert!(quoted_string("\"\\ä\"").is_err());
    }

    #[test]
    fn test_credentials() {
        assert_eq!(
            credentials("  Digest   a=b  "),
            Ok((
                "",
                CredentialsRef {
                    scheme: "Digest",
                    payload: "a=b",
                }
            ))
        );
        assert_eq!(
            credentials("Basic\t"),
            Ok((
                "",
                CredentialsRef {
                    scheme: "Basic",
                    payload: "",
                }
            ))
        );
        assert!(credentials("Basic\"x\"").is_err());
    }

    #[test]
    fn test_params() {
        assert_eq!(
            params(r#"username="Mufasa", qop=auth"#),
            Ok((
                "",
                vec![
                    ("username", ParamValue::new(0, "Mufasa")),
                    ("qop", ParamValue::new(0, "auth")),
                ]
            ))
        );
        assert_eq!(
            params(",  a = 1 ,, b=\"x\" ,"),
            Ok((
                "",
                vec![("a", ParamValue::new(0, "1")), ("b", ParamValue::new(0, "x"))]
            ))
        );
        assert_eq!(params(" , ,"), Ok(("", vec![])));
        assert_eq!(
            params("a=1 b=2"),
            Err(Err::Error(Error::new("b=2", ErrorKind::Eof)))
        );
    }
}
