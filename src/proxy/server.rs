// SPDX-License-Identifier: MIT OR Apache-2.0

//! The load balancer's HTTP surface: an `axum` router that accepts
//! Prometheus/Pyroscope-compatible requests bearing `X-Ceems-Cluster-Id`,
//! routes them through a pool's strategy, forwards to the chosen backend,
//! sanitizes the response, and always releases the connection slot, with
//! one handler class per Prometheus/Pyroscope path and an
//! `X-Ceems-Cluster-Id` extractor that 404s cleanly on an unknown pool.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;

use super::pool::PoolRegistry;
use super::sanitizer::sanitize;
use super::strategy::{PathClass, QueryFingerprint};
use crate::config::{BackendCredentials, ProxyConfig};
use crate::runtime::RequestLogger;

/// `X-Ceems-Cluster-Id` header name
pub const CLUSTER_ID_HEADER: &str = "x-ceems-cluster-id";
/// `X-Grafana-User` header, forwarded verbatim when present
pub const GRAFANA_USER_HEADER: &str = "x-grafana-user";

const MAX_BUFFERED_BODY: usize = 64 * 1024 * 1024;

struct AppState {
    registry: Arc<PoolRegistry>,
    client: Client,
    forward_timeout: Duration,
    logger: RequestLogger,
}

/// Builds the proxy's `axum` router over a shared pool registry. Takes an
/// `Arc<PoolRegistry>` (rather than owning it outright) so a caller can
/// hand the same registry to both the router and a background task, such
/// as [`LoadBalancer`]'s retention-refresh loop.
pub fn router(config: &ProxyConfig, registry: Arc<PoolRegistry>) -> Router {
    let client = Client::builder()
    .build()
    .expect("reqwest client construction is infallible for default settings");
    let state = Arc::new(AppState {
            registry,
            client,
            forward_timeout: config.forward_timeout,
            logger: RequestLogger::new(),
    });
    Router::new()
    .fallback(proxy_handler)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Owns the pool registry, the bound `axum` server task, and the
/// background retention-refresh ticker — the top-level C5 component a
/// collaborator constructs and shuts down.
pub struct LoadBalancer {
    server_handle: tokio::task::JoinHandle<()>,
    retention_handle: tokio::task::JoinHandle<()>,
    stop_tx: tokio::sync::watch::Sender<bool>,
    pub local_addr: std::net::SocketAddr,
}

impl LoadBalancer {
    /// Binds the router to `config.bind_addr`, spawns it on the runtime,
    /// and starts the 3-hourly retention-refresh loop
    pub async fn start(config: ProxyConfig, registry: PoolRegistry) -> crate::error::Result<Self> {
        let registry = Arc::new(registry);
        let refresh_interval = config.retention_refresh_interval;
        let probe_timeout = config.probe_timeout;
        let bind_addr = config.bind_addr;

        let app = router(&config, registry.clone());

        let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(crate::error::CeemsError::Io)?;
        let local_addr = listener
        .local_addr()
        .map_err(crate::error::CeemsError::Io)?;

        let server_handle = tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "load balancer server exited with error");
                }
        });

        let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
        let retention_registry = registry.clone();
        let retention_handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refresh_interval);
                ticker.tick().await;
                loop {
                    retention_registry
                    .refresh_all_retentions(refresh_interval, probe_timeout)
                    .await;
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop_rx.changed() => break,
                    }
                }
        });

        info!(%local_addr, "load balancer listening");
        Ok(Self {
                server_handle,
                retention_handle,
                stop_tx,
                local_addr,
        })
    }

    /// Stops the retention-refresh loop and aborts the server task.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.retention_handle.await;
        self.server_handle.abort();
    }
}

async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let span = state.logger.start(request.uri().path());

    let cluster_id = request
    .headers()
    .get(CLUSTER_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default()
    .to_string();

    let Some(pool) = state.registry.get(&cluster_id) else {
        state
        .logger
        .finish_error(span, &format!("unknown cluster id: {cluster_id}"));
        return (StatusCode::NOT_FOUND, format!("unknown cluster id: {cluster_id}")).into_response();
    };

    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let path_class = PathClass::from_path(&path);
    let earliest = parse_earliest(path_class, &query);

    let fingerprint = QueryFingerprint {
        cluster_id: cluster_id.clone(),
        earliest,
        path_class,
    };

    let Some(selected) = pool.select(&fingerprint).await else {
        state.logger.finish_error(span, "no live backend available");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("no live backend available for pool {cluster_id:?}"),
        )
        .into_response();
    };
    let backend = selected.backend();

    let target_url = match join_target(&backend.url, &path, &query) {
        Ok(url) => url,
        Err(e) => {
            state.logger.finish_error(span, &e.to_string());
            return (StatusCode::BAD_GATEWAY, "invalid backend url").into_response();
        }
    };

    let method = request.method().clone();
    let mut headers = request.headers().clone();
    strip_inbound_auth(&mut headers);

    let body_bytes = match to_bytes(request.into_body(), MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.logger.finish_error(span, &e.to_string());
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    let mut outbound = state
    .client
    .request(method, target_url)
    .headers(headers)
    .body(body_bytes)
    .timeout(state.forward_timeout);
    outbound = apply_credentials(outbound, backend.credentials.as_ref());

    let response = match backend
    .circuit()
    .call(|| async { outbound.send().await.map_err(crate::error::CeemsError::Http) })
    .await
    {
        Ok(response) => response,
        Err(crate::error::CeemsError::CircuitOpen(msg)) => {
            state.logger.finish_error(span, &msg);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("backend {} unavailable: {msg}", backend.id),
            )
            .into_response();
        }
        Err(e) => {
            backend.mark_proxy_error();
            error!(backend = %backend.id, error = %e, "proxy transport error");
            state.logger.finish_error(span, &e.to_string());
            return (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response();
        }
    };

    let status = response.status();
    let mut response_headers = response.headers().clone();

    let sanitizable = matches!(
        path_class,
        PathClass::Query | PathClass::QueryRange | PathClass::Series | PathClass::Labels | PathClass::LabelValues
    );

    let result = if sanitizable {
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                state.logger.finish_error(span, &e.to_string());
                return (StatusCode::BAD_GATEWAY, "failed to read upstream response").into_response();
            }
        };
        let label_name = extract_label_name(&path);
        let sanitized = sanitize(path_class, &label_name, &pool.sensitive_labels, &body);
        response_headers.insert(
            http::header::CONTENT_LENGTH,
            HeaderValue::from_str(&sanitized.len().to_string()).unwrap(),
        );
        Body::from(sanitized)
    } else {
        Body::from_stream(response.bytes_stream())
    };

    state.logger.finish_success(span);

    let mut builder = Response::builder().status(status);
    if let Some(builder_headers) = builder.headers_mut() {
        *builder_headers = response_headers;
    }
    builder
    .body(result)
    .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "response build failure").into_response())
}

/// Joins the backend's base URL with the inbound request's original path
/// and query string, so `/api/v1/query?query=up` is forwarded unchanged.
fn join_target(base: &Url, path: &str, query: &str) -> Result<Url, url::ParseError> {
    let mut url = base.join(path)?;
    url.set_query(if query.is_empty() { None } else { Some(query) });
    Ok(url)
}

/// Strips whatever the caller authenticated the proxy with, so a stale
/// `Authorization` header never leaks through when the target backend has
/// no credentials of its own configured step 3.
fn strip_inbound_auth(headers: &mut HeaderMap) {
    headers.remove(http::header::HOST);
    headers.remove(http::header::AUTHORIZATION);
}

/// Rewrites the outbound request's `Authorization` to the target
/// backend's own credentials step 3.
fn apply_credentials(
    builder: reqwest::RequestBuilder,
    credentials: Option<&BackendCredentials>,
) -> reqwest::RequestBuilder {
    match credentials {
        Some(BackendCredentials::Basic { username, password }) => {
            builder.basic_auth(username, Some(password))
        }
        Some(BackendCredentials::Bearer { token }) => builder.bearer_auth(token),
        None => builder,
    }
}

/// `label/{name}/values`: pulls `{name}` out of the request path.
fn extract_label_name(path: &str) -> String {
    path.split('/')
    .skip_while(|seg| *seg != "label")
    .nth(1)
    .unwrap_or_default()
    .to_string()
}

/// Extracts the earliest time a query references, from `start` (range
/// queries, series/labels lookups) or `time` (instant queries), falling
/// back to now when absent or unparseable so retention-aware routing only
/// rejects genuinely out-of-window historical queries, not every instant
/// query that omits an explicit `time`
fn parse_earliest(path_class: PathClass, query: &str) -> Option<SystemTime> {
    let pairs: Vec<(&str, &str)> = query
    .split('&')
    .filter_map(|pair| pair.split_once('='))
    .collect();

    let param = match path_class {
        PathClass::Query => "time",
        _ => "start",
    };

    let raw = pairs.iter().find(|(k, _)| *k == param).map(|(_, v)| *v);
    match raw.and_then(|v| v.parse::<f64>().ok()) {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs_f64(seconds))
        }
        _ => Some(SystemTime::now()),
    }
}
