// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::parse_udid_from_ioreg;

#[test]
fn parses_modern_udid() {
    let output = r#"    "IOPlatformUUID" = "00008020-0012-3456-7890-00112233445E""#;
    assert_eq!(
        parse_udid_from_ioreg(output).as_deref(),
        Some("00008020-0012-3456-7890-00112233445E")
    );
}

#[test]
fn parses_long_segment_udid() {
    // Newer devices report a 25-char identifier with uneven segments.
    let output = r#""IOPlatformUUID" = "00008120-001A22E40C29C01E-0000-000000000000""#;
    assert!(parse_udid_from_ioreg(output).is_some());
}

#[test]
fn generic_fallback_skips_key_name() {
    let output = r#""IOPlatformUUID" = "SERIALNUM123""#;
    assert_eq!(parse_udid_from_ioreg(output).as_deref(), Some("SERIALNUM123"));
}

#[yare::parameterized(
    empty = { "" },
    no_quotes = { "IOPlatformUUID = nothing here" },
    short_token = { r#""abc""# },
)]
fn unparsable_output(output: &str) {
    assert_eq!(parse_udid_from_ioreg(output), None);
}
