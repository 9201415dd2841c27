// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::sync::Arc;

use caps::{CapSet, Capability};
use nix::unistd::{self, Gid, Uid};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

use super::acl::{chown_path, AclManager};
use super::capability::CapabilitySet;
use crate::config::SecurityConfig;
use crate::error::{CeemsError, Result};

/// `exec(payload) -> Result<R>` runs a user-provided target function on a
/// thread dedicated to the call for its duration, with a specific
/// capability set raised just before entry and dropped before the thread
/// is released.
///
/// The payload is generic rather than an untyped pointer: misuse of the
/// target function's input type is a compile-time error, not a runtime
/// downcast failure.
pub struct SecurityContext {
    config: SecurityConfig,
    /// Serializes calls to `exec`: only one privileged call runs at a time,
    /// matching the single-dedicated-thread contract.
    lock: Arc<Mutex<()>>,
}

impl SecurityContext {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The capability set raised for privileged calls. In a full
    /// deployment this would be sourced from configuration; the core
    /// exposes it as a parameter to `exec_with_caps` for callers (the IPMI
    /// client, RAPL/sysfs readers) that know which capability they need.
    pub async fn exec<P, R>(&self, payload: P, f: impl FnOnce(P) -> Result<R> + Send + 'static) -> Result<R>
    where
    P: Send + 'static,
    R: Send + 'static,
    {
        self.exec_with_caps(CapabilitySet::new(), payload, f).await
    }

    /// As `exec`, but raises exactly `caps` in the effective set for the
    /// duration of `f`. Skipped entirely in native mode.
    pub async fn exec_with_caps<P, R>(
        &self,
        caps_to_raise: CapabilitySet,
        payload: P,
        f: impl FnOnce(P) -> Result<R> + Send + 'static,
    ) -> Result<R>
    where
    P: Send + 'static,
    R: Send + 'static,
    {
        let _permit = self.lock.lock().await;

        if self.config.native {
            return f(payload);
        }

        let (tx, rx) = oneshot::channel();
        let caps_for_thread = caps_to_raise.clone();
        std::thread::Builder::new()
        .name("ceems-security-ctx".into())
        .spawn(move || {
                let raise_result = raise_effective(&caps_for_thread);
                if let Err(e) = &raise_result {
                    // Logged, non-fatal: the target is still invoked and will
                    // most likely fail with EPERM failure
                    // semantics.
                    error!(error = %e, "capability raise failed before privileged call");
                }

                let result = f(payload);

                if let Err(e) = drop_effective(&caps_for_thread) {
                    warn!(error = %e, "capability drop failed after privileged call");
                }

                let _ = tx.send(result);
        })
        .map_err(|e| CeemsError::Privilege(format!("failed to spawn security-context thread: {e}")))?;

        rx.await
        .map_err(|_| CeemsError::Invariant("security-context thread dropped its result".into()))?
    }

    /// Drops privileges: if root, normalize ownership, install ACLs, switch
    /// GID/UID, then narrow capabilities; if already non-root, narrow the
    /// existing capability set directly.
    /// Fatal (returns `Err`) on any ACL or capability failure.
    pub fn drop_privileges(&self, acl_manager: &mut AclManager, keep: &CapabilitySet) -> Result<()> {
        if self.config.native {
            return Ok(());
        }

        let is_root = unistd::geteuid().is_root();

        if is_root {
            let uid = Uid::from_raw(self.config.drop_uid);
            let gid = Gid::from_raw(self.config.drop_gid);

            for cfg in acl_manager.paths() {
                if let Err(e) = chown_path(&cfg.path, uid, gid) {
                    return Err(CeemsError::Privilege(format!(
                                "failed to chown {}: {e}",
                                cfg.path.display()
                    )));
                }
            }

            acl_manager
            .install()
            .map_err(|e| CeemsError::Privilege(format!("acl install failed: {e}")))?;

            unistd::setgid(gid)
            .map_err(|e| CeemsError::Privilege(format!("setgid({gid}) failed: {e}")))?;
            // Capability-preserving setuid: raise SETUID in effective first
            // so capabilities survive the UID switch, narrow immediately
            // after.
            caps::raise(None, CapSet::Effective, Capability::CAP_SETUID)
            .map_err(|e| CeemsError::Caps(e.to_string()))?;
            unistd::setuid(uid)
            .map_err(|e| CeemsError::Privilege(format!("setuid({uid}) failed: {e}")))?;

            narrow_capabilities(keep)?;
        } else {
            let current = caps::read(None, CapSet::Effective).map_err(|e| CeemsError::Caps(e.to_string()))?;
            if !current.is_empty() {
                narrow_capabilities(keep)?;
            }
        }

        acl_manager
        .verify_reachable()
        .map_err(|e| CeemsError::Privilege(format!("acl reachability check failed: {e}")))?;

        info!(uid = self.config.drop_uid, gid = self.config.drop_gid, "privileges dropped");
        Ok(())
    }
}

/// Places `caps` in *permitted*, clears *effective*, clears *inheritable*,
/// then re-applies — the "narrow" half of the drop-privileges protocol.
fn narrow_capabilities(caps: &CapabilitySet) -> Result<()> {
    let set: HashSet<Capability> = caps.iter().copied().collect();
    caps::set(None, CapSet::Permitted, &set).map_err(|e| CeemsError::Caps(e.to_string()))?;
    caps::clear(None, CapSet::Effective).map_err(|e| CeemsError::Caps(e.to_string()))?;
    caps::clear(None, CapSet::Inheritable).map_err(|e| CeemsError::Caps(e.to_string()))?;
    Ok(())
}

fn raise_effective(caps: &CapabilitySet) -> Result<()> {
    for cap in caps {
        caps::raise(None, CapSet::Effective, *cap).map_err(|e| CeemsError::Caps(e.to_string()))?;
    }
    Ok(())
}

fn drop_effective(caps: &CapabilitySet) -> Result<()> {
    for cap in caps {
        caps::drop(None, CapSet::Effective, *cap).map_err(|e| CeemsError::Caps(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn native_mode_bypasses_capability_raise() {
        let ctx = SecurityContext::new(SecurityConfig::native());
        let mut caps = CapabilitySet::new();
        caps.insert(Capability::CAP_SETUID);
        let result = ctx.exec_with_caps(caps, 1, |n| Ok(n * 2)).await.unwrap();
        assert_eq!(result, 2);
    }
}
