// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collaborator-provided interfaces the orchestrator consumes.

use std::path::{Path, PathBuf};

/// Produces the local artifact to upload for a given agent.
pub trait ArtifactProvider: Send + Sync {
    /// Filesystem path of the agent's (possibly patched) binary, or `None`
    /// if the agent has no artifact in the workspace.
    fn path_for_agent(&self, agent_id: &str) -> Option<PathBuf>;
}

/// Read-only view of the static analysis database's image base.
pub trait StaticImageProvider: Send + Sync {
    fn static_image_base(&self) -> u64;
}

/// Well-known SSH keypair paths for public-key authentication.
pub trait CredentialProvider: Send + Sync {
    fn private_key_path(&self) -> PathBuf;
    fn public_key_path(&self) -> PathBuf;
}

/// Keypair at a fixed directory, named `pool_ssh_key`/`pool_ssh_key.pub`.
#[derive(Debug, Clone)]
pub struct FixedKeyDir {
    dir: PathBuf,
}

impl FixedKeyDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CredentialProvider for FixedKeyDir {
    fn private_key_path(&self) -> PathBuf {
        self.dir.join("pool_ssh_key")
    }

    fn public_key_path(&self) -> PathBuf {
        self.dir.join("pool_ssh_key.pub")
    }
}

/// Static image base known up front (the usual case: the database is open
/// and its base does not move).
#[derive(Debug, Clone, Copy)]
pub struct FixedImageBase(pub u64);

impl StaticImageProvider for FixedImageBase {
    fn static_image_base(&self) -> u64 {
        self.0
    }
}

/// Artifacts laid out as `<root>/<agent_id>/binary`.
#[derive(Debug, Clone)]
pub struct WorkspaceArtifacts {
    root: PathBuf,
}

impl WorkspaceArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidate(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id).join("binary")
    }
}

impl ArtifactProvider for WorkspaceArtifacts {
    fn path_for_agent(&self, agent_id: &str) -> Option<PathBuf> {
        let path = self.candidate(agent_id);
        path.is_file().then_some(path)
    }
}

/// Convenience for tests and simple embeddings: a single fixed artifact.
#[derive(Debug, Clone)]
pub struct FixedArtifact(pub PathBuf);

impl FixedArtifact {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_path_buf())
    }
}

impl ArtifactProvider for FixedArtifact {
    fn path_for_agent(&self, _agent_id: &str) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}
