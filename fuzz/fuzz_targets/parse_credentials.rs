// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

// Runs both the table-driven credentials parser and a nom-based one, failing
// if their outputs differ or if either panics. Also feeds the payload to the
// scheme-specific decoders, which must never panic. Run via:
//
// ```console
// $ cd .../http-auth-strategies/fuzz
// $ cargo +nightly test
// $ RUST_LOG=http_auth_strategies=trace cargo +nightly fuzz run parse_credentials

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = env_logger::builder().try_init();
    let hand = http_auth_strategies::parser::parse_credentials(data);
    let nom = http_auth_strategies_fuzz::credentials(data);
    let credentials = match (hand, nom) {
        (Ok(hand_c), Ok((_, nom_c))) => {
            assert_eq!(hand_c, nom_c);
            hand_c
        }
        (Err(hand_e), Ok((_, nom_c))) => {
            panic!(
                "hand parsing failed with {}; nom parsing succeeded with {:#?}",
                hand_e, nom_c
            );
        }
        (Ok(hand_c), Err(nom_e)) => {
            panic!(
                "nom parsing failed with {}; hand parsing succeeded with {:#?}",
                nom_e, hand_c
            );
        }
        (Err(_hand_e), Err(_nom_e)) => return, // messages don't need to match.
    };

    let hand = http_auth_strategies::parser::parse_params(credentials.payload);
    let nom = http_auth_strategies_fuzz::params(credentials.payload);
    match (hand, nom) {
        (Ok(hand_p), Ok((_, nom_p))) => assert_eq!(hand_p, nom_p),
        (Err(hand_e), Ok((_, nom_p))) => {
            panic!(
                "hand parsing failed with {}; nom parsing succeeded with {:#?}",
                hand_e, nom_p
            );
        }
        (Ok(hand_p), Err(nom_e)) => {
            panic!(
                "nom parsing failed with {}; hand parsing succeeded with {:#?}",
                nom_e, hand_p
            );
        }
        (Err(_hand_e), Err(_nom_e)) => {}
    }

    let _ = http_auth_strategies::basic::decode_credentials(credentials.payload);
    if let Ok(c) = http_auth_strategies::digest::DigestCredentials::parse(credentials.payload) {
        let _ = c.nc_value();
    }
});
