//! HTTP surface: health probes, Prometheus exposition and the model facade

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::info;

use heapster_lib::core::{cluster_key, namespace_key, node_key, pod_key};
use heapster_lib::health::PipelineHealth;
use heapster_lib::sinks::MetricSink;
use heapster_lib::store::TimePoint;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<PipelineHealth>,
    pub sink: Arc<MetricSink>,
}

/// Time range of a model query, RFC 3339 formatted.
#[derive(Debug, Default, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricResult {
    pub metrics: Vec<MetricPoint>,
    #[serde(rename = "latestTimestamp")]
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Window aggregates of one (entity, metric) store. Percentile keys are
/// rendered as whole percents ("50", "95", "99").
#[derive(Debug, Serialize)]
pub struct StatsResult {
    pub average: u64,
    pub max: u64,
    pub percentiles: BTreeMap<String, u64>,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.probe(state.sink.latest_timestamp());
    let status_code = if report.live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.probe(state.sink.latest_timestamp());
    let status_code = if report.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

async fn prometheus_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

fn metric_result(state: &AppState, key: String, metric: &str, range: TimeRange) -> MetricResult {
    let mut by_key = state
        .sink
        .get_metric(metric, &[key.clone()], range.start, range.end);
    let points = by_key.remove(&key).unwrap_or_default();
    MetricResult {
        metrics: points
            .into_iter()
            .map(|TimePoint { timestamp, value }| MetricPoint { timestamp, value })
            .collect(),
        latest_timestamp: state.sink.latest_timestamp(),
    }
}

/// All metric names available for the cluster entity.
async fn cluster_metric_names(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sink.get_metric_names(&cluster_key()))
}

async fn cluster_metric(
    State(state): State<Arc<AppState>>,
    Path(metric): Path<String>,
    Query(range): Query<TimeRange>,
) -> impl IntoResponse {
    Json(metric_result(&state, cluster_key(), &metric, range))
}

async fn node_metric_names(
    State(state): State<Arc<AppState>>,
    Path(node): Path<String>,
) -> impl IntoResponse {
    Json(state.sink.get_metric_names(&node_key(&node)))
}

async fn node_metric(
    State(state): State<Arc<AppState>>,
    Path((node, metric)): Path<(String, String)>,
    Query(range): Query<TimeRange>,
) -> impl IntoResponse {
    Json(metric_result(&state, node_key(&node), &metric, range))
}

async fn namespace_metric_names(
    State(state): State<Arc<AppState>>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    Json(state.sink.get_metric_names(&namespace_key(&namespace)))
}

async fn namespace_metric(
    State(state): State<Arc<AppState>>,
    Path((namespace, metric)): Path<(String, String)>,
    Query(range): Query<TimeRange>,
) -> impl IntoResponse {
    Json(metric_result(
        &state,
        namespace_key(&namespace),
        &metric,
        range,
    ))
}

async fn pod_metric_names(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod)): Path<(String, String)>,
) -> impl IntoResponse {
    Json(state.sink.get_metric_names(&pod_key(&namespace, &pod)))
}

async fn pod_metric(
    State(state): State<Arc<AppState>>,
    Path((namespace, pod, metric)): Path<(String, String, String)>,
    Query(range): Query<TimeRange>,
) -> impl IntoResponse {
    Json(metric_result(
        &state,
        pod_key(&namespace, &pod),
        &metric,
        range,
    ))
}

fn stats_result(state: &AppState, key: &str, metric: &str) -> Result<StatsResult, StatusCode> {
    let stats = state
        .sink
        .get_stats(key, metric)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(StatsResult {
        average: stats.average,
        max: stats.max,
        percentiles: stats
            .percentiles
            .into_iter()
            .map(|(p, v)| (format!("{}", (p * 100.0).round() as u32), v))
            .collect(),
    })
}

async fn cluster_metric_stats(
    State(state): State<Arc<AppState>>,
    Path(metric): Path<String>,
) -> Result<Json<StatsResult>, StatusCode> {
    stats_result(&state, &cluster_key(), &metric).map(Json)
}

async fn node_metric_stats(
    State(state): State<Arc<AppState>>,
    Path((node, metric)): Path<(String, String)>,
) -> Result<Json<StatsResult>, StatusCode> {
    stats_result(&state, &node_key(&node), &metric).map(Json)
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/model/metrics", get(cluster_metric_names))
        .route("/api/v1/model/metrics/:metric", get(cluster_metric))
        .route(
            "/api/v1/model/metrics/:metric/stats",
            get(cluster_metric_stats),
        )
        .route(
            "/api/v1/model/nodes/:node/metrics",
            get(node_metric_names),
        )
        .route(
            "/api/v1/model/nodes/:node/metrics/:metric",
            get(node_metric),
        )
        .route(
            "/api/v1/model/nodes/:node/metrics/:metric/stats",
            get(node_metric_stats),
        )
        .route(
            "/api/v1/model/namespaces/:namespace/metrics",
            get(namespace_metric_names),
        )
        .route(
            "/api/v1/model/namespaces/:namespace/metrics/:metric",
            get(namespace_metric),
        )
        .route(
            "/api/v1/model/namespaces/:namespace/pods/:pod/metrics",
            get(pod_metric_names),
        )
        .route(
            "/api/v1/model/namespaces/:namespace/pods/:pod/metrics/:metric",
            get(pod_metric),
        )
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapster_lib::sinks::StoreParams;
    use std::time::Duration;

    fn state() -> AppState {
        AppState {
            health: Arc::new(PipelineHealth::new(Duration::from_secs(30))),
            sink: MetricSink::new(StoreParams::default()),
        }
    }

    #[test]
    fn test_metric_result_shape() {
        let state = state();
        let result = metric_result(
            &state,
            cluster_key(),
            "memory/usage",
            TimeRange::default(),
        );
        assert!(result.metrics.is_empty());
        assert!(result.latest_timestamp.is_none());
    }

    #[test]
    fn test_probe_report_before_first_cycle() {
        let state = state();
        let report = state.health.probe(state.sink.latest_timestamp());
        assert!(report.live());
        assert!(!report.ready());
    }
}
