// SPDX-License-Identifier: MIT OR Apache-2.0

//! POSIX ACL lifecycle for the paths the drop-privileges target user needs
//! to reach "ACL manager".

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use exacl::{AclEntry as ExAclEntry, AclEntryKind, AclOption, Perm};
use nix::unistd::{self, Gid, Uid};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AclPathConfig, AclPathMode};

#[derive(Debug, Error)]
pub enum AclManagerError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("path {0} unreachable for uid {1} after privilege drop")]
    Unreachable(String, u32),
    #[error("failed to install acl entry on {path}: {source}")]
    Install {
        path: String,
        #[source]
        source: exacl::Error,
    },
    #[error("failed to remove acl entry from {path}: {source}")]
    Remove {
        path: String,
        #[source]
        source: exacl::Error,
    },
}

/// Bits an ACL entry must grant, derived from `AclPathMode` and whether the
/// path is a directory
fn required_perms(mode: AclPathMode, is_dir: bool) -> Perm {
    match (mode, is_dir) {
        (AclPathMode::ReadOnly, false) => Perm::READ,
        (AclPathMode::ReadOnly, true) => Perm::READ | Perm::EXECUTE,
        (AclPathMode::ReadWrite, false) => Perm::READ | Perm::WRITE,
        (AclPathMode::ReadWrite, true) => Perm::READ | Perm::WRITE | Perm::EXECUTE,
    }
}

/// Does the owner/other bits on `path` already satisfy `perms` for `uid`?
fn already_satisfied(path: &Path, uid: u32, perms: Perm) -> Result<bool, AclManagerError> {
    let meta = fs::metadata(path).map_err(|e| AclManagerError::Stat {
            path: path.display().to_string(),
            source: e,
    })?;
    let mode = meta.permissions().mode();
    // Owner bits apply when the target uid already owns the path; otherwise
    // only the "other" bits are guaranteed.
    let (r_bit, w_bit, x_bit) = if meta.uid() == uid {
        (0o400, 0o200, 0o100)
    } else {
        (0o004, 0o002, 0o001)
    };
    let want_r = perms.contains(Perm::READ);
    let want_w = perms.contains(Perm::WRITE);
    let want_x = perms.contains(Perm::EXECUTE);
    Ok((!want_r || mode & r_bit != 0)
        && (!want_w || mode & w_bit != 0)
        && (!want_x || mode & x_bit != 0))
}

/// Installs and removes the POSIX ACL entries the configured paths need so
/// that the drop-privileges target user can reach them.
pub struct AclManager {
    paths: Vec<AclPathConfig>,
    drop_uid: u32,
    installed: Vec<std::path::PathBuf>,
}

impl AclManager {
    pub fn new(paths: Vec<AclPathConfig>, drop_uid: u32) -> Self {
        Self {
            paths,
            drop_uid,
            installed: Vec::new(),
        }
    }

    pub fn paths(&self) -> &[AclPathConfig] {
        &self.paths
    }

    /// Installs ACL entries for every path lacking sufficient owner/other
    /// bits. Fatal at startup on any failure
    pub fn install(&mut self) -> Result<(), AclManagerError> {
        for cfg in &self.paths {
            let perms = required_perms(cfg.mode, cfg.is_dir);
            if already_satisfied(&cfg.path, self.drop_uid, perms)? {
                debug!(path = %cfg.path.display(), "acl: owner/other bits already sufficient");
                continue;
            }
            let entry = ExAclEntry::allow_user(self.drop_uid, perms, None);
            exacl::setfacl(&[&cfg.path], &[entry], AclOption::empty()).map_err(|e| {
                    AclManagerError::Install {
                        path: cfg.path.display().to_string(),
                        source: e,
                    }
            })?;
            info!(path = %cfg.path.display(), uid = self.drop_uid, "installed acl entry");
            self.installed.push(cfg.path.clone());
        }
        Ok(())
    }

    /// Verifies every configured path is reachable for `drop_uid` — called
    /// after the UID/GID switch. Fatal at startup if any path fails.
    pub fn verify_reachable(&self) -> Result<(), AclManagerError> {
        for cfg in &self.paths {
            if fs::metadata(&cfg.path).is_err() {
                return Err(AclManagerError::Unreachable(
                        cfg.path.display().to_string(),
                        self.drop_uid,
                ));
            }
        }
        Ok(())
    }

    /// Removes every ACL entry this manager installed. Must be called
    /// while `CAP_FOWNER` is raised in the effective set (the caller does
    /// this via a nested `SecurityContext::exec`)
    pub fn teardown(&mut self) -> Result<(), AclManagerError> {
        for path in self.installed.drain(..) {
            let current = exacl::getfacl(&path, None).map_err(|e| AclManagerError::Remove {
                    path: path.display().to_string(),
                    source: e,
            })?;
            let remaining: Vec<ExAclEntry> = current
            .into_iter()
            .filter(|e| {
                    !(e.kind == AclEntryKind::User && e.name == self.drop_uid.to_string())
            })
            .collect();
            exacl::setfacl(&[&path], &remaining, AclOption::empty()).map_err(|e| {
                    warn!(path = %path.display(), error = %e, "failed to remove acl entry");
                    AclManagerError::Remove {
                        path: path.display().to_string(),
                        source: e,
                    }
            })?;
        }
        Ok(())
    }
}

/// Normalizes ownership of a configured path to `(uid, gid)`. Only called
/// from the root branch of the drop-privileges protocol.
pub fn chown_path(path: &Path, uid: Uid, gid: Gid) -> Result<(), nix::Error> {
    unistd::chown(path, Some(uid), Some(gid))
}
