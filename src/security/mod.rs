// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security context (C3): thread-pinned privileged execution plus POSIX ACL
//! lifecycle management.
//!
//! Privileged operations — IPMI ioctls, reading root-owned sysfs, setuid
//! child processes — must execute with just-enough OS privileges, for the
//! smallest possible window, from a thread whose identity cannot leak those
//! privileges to unrelated work. `SecurityContext::exec` is the one door
//! through which such code runs.

mod acl;
mod capability;
mod context;

pub use acl::{AclManager, AclManagerError};
pub use capability::CapabilitySet;
pub use context::SecurityContext;

pub use caps::Capability;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    #[tokio::test]
    async fn native_mode_runs_target_directly() {
        let ctx = SecurityContext::new(SecurityConfig::native());
        let out = ctx.exec(41, |n| Ok(n + 1)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn native_mode_propagates_target_error() {
        let ctx = SecurityContext::new(SecurityConfig::native());
        let out: crate::error::Result<()> = ctx
        .exec((), |_| Err(crate::error::CeemsError::Invariant("boom".into())))
        .await;
        assert!(out.is_err());
    }
}
