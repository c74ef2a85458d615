// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{
    child_pid_command, kill_command, launch_command, netstat_check_command, parse_pid,
    port_is_listening,
};

#[test]
fn launch_command_shape() {
    let cmd = launch_command(5678, "/var/mobile/agent/binary");
    assert_eq!(
        cmd,
        "nohup debugserver 0.0.0.0:5678 \"/var/mobile/agent/binary\" \
         > /tmp/debugserver.log 2>&1 & echo $!"
    );
}

#[test]
fn launch_command_quotes_paths_with_spaces() {
    let cmd = launch_command(1234, "/var/containers/Krispy Kreme.app/Krispy Kreme");
    assert!(cmd.contains("\"/var/containers/Krispy Kreme.app/Krispy Kreme\""));
}

#[test]
fn netstat_check_matches_port_in_listen() {
    let cmd = netstat_check_command(5678);
    assert!(cmd.contains("[:.]5678.*LISTEN"));
    assert!(cmd.contains("echo LISTENING"));
    assert!(cmd.contains("echo NOT_LISTENING"));
}

#[yare::parameterized(
    listening = { "LISTENING", true },
    listening_newline = { "LISTENING\n", true },
    listening_padded = { "  LISTENING  \n", true },
    not_listening = { "NOT_LISTENING", false },
    not_listening_newline = { "NOT_LISTENING\n", false },
    empty = { "", false },
    garbage = { "zsh: command not found: netstat", false },
)]
fn port_poll_decision(output: &str, expected: bool) {
    assert_eq!(port_is_listening(output), expected);
}

#[test]
fn child_pid_command_anchors_parent() {
    let cmd = child_pid_command(4242);
    assert!(cmd.contains("grep ' 4242$'"));
}

#[yare::parameterized(
    both = { 100, Some(200), Some("kill -9 100 200") },
    server_only = { 100, None, Some("kill -9 100") },
    debugged_invalid = { 100, Some(-1), Some("kill -9 100") },
    neither = { -1, None, None },
)]
fn kill_commands(server: i32, debugged: Option<i32>, expected: Option<&str>) {
    assert_eq!(kill_command(server, debugged).as_deref(), expected);
}

#[yare::parameterized(
    plain = { "1234", Some(1234) },
    trailing_newline = { "1234\n", Some(1234) },
    surrounding_space = { "  1234  \n", Some(1234) },
    first_line_wins = { "77\n88\n", Some(77) },
    empty = { "", None },
    garbage = { "no pid here", None },
    negative = { "-4", None },
    zero = { "0", None },
)]
fn pid_parsing(output: &str, expected: Option<i32>) {
    assert_eq!(parse_pid(output), expected);
}
