// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{Error, ErrorKind};

#[yare::parameterized(
    config = { ErrorKind::Config, "CONFIG" },
    network = { ErrorKind::Network, "NETWORK" },
    auth = { ErrorKind::Auth, "AUTH" },
    unsupported = { ErrorKind::Unsupported, "UNSUPPORTED" },
    sync = { ErrorKind::Sync, "SYNC" },
    sign = { ErrorKind::Sign, "SIGN" },
    server_launch = { ErrorKind::ServerLaunch, "SERVER_LAUNCH" },
    driver = { ErrorKind::Driver, "DRIVER" },
    timeout = { ErrorKind::Timeout, "TIMEOUT" },
    not_found = { ErrorKind::NotFound, "NOT_FOUND" },
    forbidden = { ErrorKind::Forbidden, "FORBIDDEN" },
    rejected = { ErrorKind::Rejected, "REJECTED" },
    internal = { ErrorKind::Internal, "INTERNAL" },
)]
fn kind_strings(kind: ErrorKind, expected: &str) {
    assert_eq!(kind.as_str(), expected);
}

#[test]
fn display_includes_kind_and_message() {
    let err = Error::timeout("waited 500 ms for a device");
    assert_eq!(err.to_string(), "TIMEOUT: waited 500 ms for a device");
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.message(), "waited 500 ms for a device");
}

#[test]
fn constructors_set_kind() {
    assert_eq!(Error::config("x").kind(), ErrorKind::Config);
    assert_eq!(Error::server_launch("x").kind(), ErrorKind::ServerLaunch);
    assert_eq!(Error::rejected("x").kind(), ErrorKind::Rejected);
}
