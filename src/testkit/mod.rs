// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test-only helpers: an in-process `axum` stub server for exercising the
//! core's HTTP-backed components (Redfish, RTE, Electricity Maps,
//! WattTime, Prometheus-compatible backends) without real network access,
//! and an environment-gate for the one genuinely hardware-dependent suite
//! (IPMI device ioctls against a real `/dev/ipmi*` node).

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Environment variable gating hardware-dependent IPMI tests, following
/// the same pattern as other hardware/cluster-gated integration suites:
/// skip by default, opt in explicitly in CI jobs that have the real
/// device attached.
pub const CEEMS_DEV_TESTS: &str = "CEEMS_DEV_TESTS";

/// `true` if hardware-dependent tests should run in this process.
pub fn hardware_tests_enabled() -> bool {
    std::env::var(CEEMS_DEV_TESTS).is_ok()
}

/// Skips the calling test (by returning early) unless
/// [`CEEMS_DEV_TESTS`] is set. Intended for use at the top of a
/// `#[tokio::test]` that needs a real `/dev/ipmi*` device.
///
/// ```
/// use ceems_core::testkit::skip_unless_hardware_tests;
///
/// # async fn example() {
/// if skip_unless_hardware_tests("ipmi_dcmi_roundtrip") {
/// return;
/// }
/// # }
/// ```
pub fn skip_unless_hardware_tests(test_name: &str) -> bool {
    if hardware_tests_enabled() {
        false
    } else {
        eprintln!("skipping {test_name}: {CEEMS_DEV_TESTS} not set");
        true
    }
}

/// An in-process HTTP server bound to an ephemeral localhost port, for
/// stubbing Redfish/RTE/Electricity-Maps/WattTime/Prometheus responses in
/// tests. Aborts its listener task on drop.
pub struct StubServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl StubServer {
    /// Binds `router` to an ephemeral port on `127.0.0.1` and serves it on
    /// a background task.
    pub async fn start(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("stub server failed to bind an ephemeral port");
        let addr = listener.local_addr().expect("stub server has no local addr");
        let handle = tokio::spawn(async move {
                let _ = axum::serve(listener, router).await;
        });
        Self { addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn stub_server_serves_a_route() {
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let server = StubServer::start(router).await;

        let response = reqwest::get(format!("{}/ping", server.base_url()))
        .await
        .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "pong");
    }

    #[test]
    fn hardware_gate_reads_its_own_env_var() {
        std::env::remove_var(CEEMS_DEV_TESTS);
        assert!(!hardware_tests_enabled());
    }
}
