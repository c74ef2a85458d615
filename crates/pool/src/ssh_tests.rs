// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use super::{escape_single_quotes, login_shell, write_chunked};

#[yare::parameterized(
    plain = { "echo hi", "echo hi" },
    one_quote = { "it's", "it'\\''s" },
    two_quotes = { "'x'", "'\\''x'\\''" },
    empty = { "", "" },
)]
fn escaping(input: &str, expected: &str) {
    assert_eq!(escape_single_quotes(input), expected);
}

#[test]
fn login_shell_wraps_and_escapes() {
    assert_eq!(login_shell("echo 'hi'"), "exec zsh -l -c 'echo '\\''hi'\\'''");
    assert_eq!(login_shell("uname -m"), "exec zsh -l -c 'uname -m'");
}

proptest::proptest! {
    /// Unwrapping the escaped string by interpreting shell quoting yields
    /// the original input.
    #[test]
    fn escape_round_trips(s in "[ -~]{0,64}") {
        let escaped = escape_single_quotes(&s);
        // Interpret: inside single quotes, '\'' closes, emits a literal
        // quote, and reopens. Simulate that.
        let unescaped = escaped.replace("'\\''", "'");
        proptest::prop_assert_eq!(unescaped, s);
    }
}

/// Writer that accepts at most `limit` bytes per write call and records
/// everything it receives.
struct ShortWriter {
    limit: usize,
    data: Vec<u8>,
}

impl AsyncWrite for ShortWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let n = buf.len().min(self.limit);
        self.data.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn upload_loop_survives_short_writes() {
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let mut writer = ShortWriter { limit: 7, data: Vec::new() };

    let written = write_chunked(&mut writer, &payload).await.map_err(|e| e.to_string());
    assert_eq!(written, Ok(payload.len()));
    assert_eq!(writer.data, payload);
}

#[tokio::test]
async fn zero_length_write_is_an_error() {
    struct DeadWriter;
    impl AsyncWrite for DeadWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    let mut writer = DeadWriter;
    let result = write_chunked(&mut writer, b"payload").await;
    assert!(result.is_err());
}
