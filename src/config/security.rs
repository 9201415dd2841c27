// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

/// Access mode requested for a path the security context manages the ACLs
/// of: read-only paths get `r` (files) / `rx` (dirs), read-write paths get
/// `rw` (files) / `rwx` (dirs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPathMode {
    ReadOnly,
    ReadWrite,
}

/// One path the ACL manager must make reachable for the drop-privileges
/// target user, installing a POSIX ACL entry only if the owner/other bits
/// do not already grant it.
#[derive(Debug, Clone)]
pub struct AclPathConfig {
    pub path: PathBuf,
    pub mode: AclPathMode,
    pub is_dir: bool,
}

impl AclPathConfig {
    pub fn read_only(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            mode: AclPathMode::ReadOnly,
            is_dir,
        }
    }

    pub fn read_write(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            mode: AclPathMode::ReadWrite,
            is_dir,
        }
    }
}

/// Configuration for the security context (C3).
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// If `true`, `exec()` runs the target directly on the calling runtime
    /// without raising any capability — used in development and CI where
    /// the process is not expected to hold the capabilities it would need
    /// in production.
    pub native: bool,

    /// User the process drops privileges to after installing ACLs.
    pub drop_uid: u32,
    pub drop_gid: u32,

    /// Paths the ACL manager must make reachable for `drop_uid`/`drop_gid`.
    pub acl_paths: Vec<AclPathConfig>,
}

impl SecurityConfig {
    pub fn native() -> Self {
        Self {
            native: true,
            drop_uid: 0,
            drop_gid: 0,
            acl_paths: Vec::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::native()
    }
}
