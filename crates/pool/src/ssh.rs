// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scoped SSH transport: connect, exec, SFTP upload.
//!
//! A session lives for one logical operation and is dropped (or explicitly
//! closed) at the end of the scope that created it; no pooling. Commands
//! are wrapped in a login shell so the remote `PATH` matches what an
//! interactive session would see; on jailbroken device layouts the tools
//! live under `/var/jb/usr/bin` and are invisible to a bare exec channel.

use std::io;
use std::path::Path;

use async_ssh2_tokio::client::{AuthMethod, Client, ServerCheckMethod};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// SFTP write granularity. The transport may accept fewer bytes per write;
/// the upload loop handles that.
const UPLOAD_CHUNK: usize = 32 * 1024;

/// Output of a remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub exit_status: u32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An authenticated SSH session to one device.
pub struct SshSession {
    client: Client,
    host: String,
}

impl SshSession {
    /// Resolve, connect, handshake, and authenticate with the keypair at
    /// `private_key`.
    pub async fn connect(host: &str, port: u16, user: &str, private_key: &Path) -> Result<Self> {
        if !private_key.is_file() {
            return Err(Error::auth(format!(
                "private key not found at {}",
                private_key.display()
            )));
        }

        let auth = AuthMethod::with_key_file(private_key, None);
        let client = Client::connect((host, port), user, auth, ServerCheckMethod::NoCheck)
            .await
            .map_err(|e| classify_connect_error(&e, host, port))?;

        debug!(host, port, user, "ssh session established");
        Ok(Self { client, host: host.to_owned() })
    }

    /// Run `command` under a login shell and collect its stdout.
    ///
    /// A nonzero exit status is not an error here: the stdout often carries
    /// the diagnostic, so the caller gets both and decides.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let wrapped = login_shell(command);
        let result = self.client.execute(&wrapped).await.map_err(|e| {
            Error::network(format!("command execution on {} failed: {e}", self.host))
        })?;

        if result.exit_status != 0 {
            debug!(host = %self.host, status = result.exit_status, "remote command exited nonzero");
        }
        Ok(ExecOutput { stdout: result.stdout, exit_status: result.exit_status })
    }

    /// SFTP-upload `local_path` to `remote_path`, overwriting, mode 0755.
    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            Error::sync(format!("failed to read local file {}: {e}", local_path.display()))
        })?;

        let channel = self
            .client
            .get_channel()
            .await
            .map_err(|e| Error::sync(format!("failed to open SFTP channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::sync(format!("SFTP subsystem request failed: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::sync(format!("SFTP initialization failed: {e}")))?;

        let flags = OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE;
        let mut file = sftp
            .open_with_flags(remote_path, flags)
            .await
            .map_err(|e| Error::sync(format!("failed to open remote file {remote_path}: {e}")))?;

        let written = write_chunked(&mut file, &data)
            .await
            .map_err(|e| Error::sync(format!("SFTP write to {remote_path} failed: {e}")))?;
        file.shutdown()
            .await
            .map_err(|e| Error::sync(format!("failed to finalize {remote_path}: {e}")))?;

        let attrs = FileAttributes { permissions: Some(0o755), ..Default::default() };
        sftp.set_metadata(remote_path, attrs)
            .await
            .map_err(|e| Error::sync(format!("failed to set mode on {remote_path}: {e}")))?;

        debug!(host = %self.host, remote = remote_path, bytes = written, "uploaded artifact");
        Ok(())
    }

    /// Tear the session down. Dropping the session is equivalent; this just
    /// sends the disconnect message eagerly.
    pub async fn close(self) {
        if let Err(e) = self.client.disconnect().await {
            warn!(host = %self.host, error = %e, "ssh disconnect failed");
        }
    }
}

fn classify_connect_error(e: &async_ssh2_tokio::Error, host: &str, port: u16) -> Error {
    match e {
        async_ssh2_tokio::Error::KeyAuthFailed => Error::auth(format!(
            "SSH authentication to {host}:{port} rejected; is the public key in authorized_keys?"
        )),
        other => Error::network(format!("SSH connection to {host}:{port} failed: {other}")),
    }
}

/// Write all of `data`, chunked, looping on short writes.
pub(crate) async fn write_chunked<W>(writer: &mut W, data: &[u8]) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut total = 0usize;
    for chunk in data.chunks(UPLOAD_CHUNK) {
        let mut offset = 0usize;
        while offset < chunk.len() {
            let n = writer.write(&chunk[offset..]).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "zero-length write"));
            }
            offset += n;
        }
        total += chunk.len();
    }
    Ok(total)
}

/// Wrap a command so it runs under a login shell with the interactive
/// `PATH`.
pub(crate) fn login_shell(command: &str) -> String {
    format!("exec zsh -l -c '{}'", escape_single_quotes(command))
}

/// Escape single quotes for embedding in a single-quoted shell string.
pub(crate) fn escape_single_quotes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod tests;
