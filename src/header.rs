// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serialization of `WWW-Authenticate` challenges.
//!
//! ```text
//! challenge   = auth-scheme [ 1*SP ( token68 / #auth-param ) ]
//! auth-param  = token BWS "=" BWS ( token / quoted-string )
//! ```

use crate::table::{char_classes, C_TCHAR};

/// Builds a single challenge, one auth-param at a time.
///
/// ```rust
/// use http_auth_strategies::header::ChallengeWriter;
/// let c = ChallengeWriter::new("Digest")
///     .quoted("realm", "a \"b\"")
///     .token("algorithm", "MD5")
///     .finish();
/// assert_eq!(c, r#"Digest realm="a \"b\"", algorithm=MD5"#);
/// ```
#[derive(Clone, Debug)]
pub struct ChallengeWriter {
    out: String,
    has_params: bool,
}

impl ChallengeWriter {
    pub fn new(scheme: &str) -> Self {
        let mut out = String::with_capacity(128);
        out.push_str(scheme);
        ChallengeWriter {
            out,
            has_params: false,
        }
    }

    fn name(&mut self, name: &str) {
        self.out.push_str(if self.has_params { ", " } else { " " });
        self.has_params = true;
        self.out.push_str(name);
        self.out.push('=');
    }

    /// Appends `name="value"`, escaping `"` and `\` within the value.
    pub fn quoted(mut self, name: &str, value: &str) -> Self {
        self.name(name);
        append_quoted(&mut self.out, value);
        self
    }

    /// Appends `name=value`. The value must already be a valid token.
    pub fn token(mut self, name: &str, value: &str) -> Self {
        let is_token =
            !value.is_empty() && value.bytes().all(|b| (char_classes(b) & C_TCHAR) != 0);
        debug_assert!(is_token, "{:?} is not a token", value);
        self.name(name);
        self.out.push_str(value);
        self
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Appends `value` to `out` as a `quoted-string`.
pub(crate) fn append_quoted(out: &mut String, value: &str) {
    out.reserve(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn scheme_only() {
        assert_eq!(ChallengeWriter::new("Negotiate").finish(), "Negotiate");
    }

    #[test]
    fn mixed() {
        assert_eq!(
            ChallengeWriter::new("Digest")
                .quoted("realm", "Users")
                .quoted("domain", "/a /b")
                .token("algorithm", "SHA-256")
                .quoted("qop", "auth,auth-int")
                .token("stale", "true")
                .finish(),
            r#"Digest realm="Users", domain="/a /b", algorithm=SHA-256, qop="auth,auth-int", stale=true"#
        );
    }

    #[test]
    fn escapes_round_trip_through_parser() {
        let c = ChallengeWriter::new("Basic")
            .quoted("realm", r#"back\slash "quoted""#)
            .finish();
        let creds = crate::parser::parse_credentials(&c).unwrap();
        let params = crate::parser::parse_params(creds.payload).unwrap();
        assert_eq!(params[0].1.to_unescaped(), r#"back\slash "quoted""#);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "is not a token")]
    fn token_rejects_quoted_value() {
        ChallengeWriter::new("Digest").token("realm", "two words");
    }
}
