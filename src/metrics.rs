use std::{sync::LazyLock, time::Instant};

use axum::{body::Body, extract::State, http::{Request, Response, StatusCode}, middleware::Next, routing::get, Router};
use prometheus::{proto::{Metric, MetricType}, register_histogram_vec, register_int_counter, register_int_counter_vec};

use crate::{api::errors::internal_and_log, state::AppState, ApiResult};

pub fn metrics_router(enabled: bool) -> Router<AppState> {
    if !enabled { return Router::new(); }
    tracing::info!("Metrics enabled! You can access them on /metrics");
    Router::new()
        .route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> ApiResult<String> {
    let mut metric_families = prometheus::gather();

    // Live sessions are owned by the dispatcher, so ask it at scrape time
    let sessions = {
        let mut metric = prometheus::proto::Metric::default();
        metric.set_gauge(prometheus::proto::Gauge::default());
        metric.gauge.mut_or_insert_default().set_value(state.hub.connected_count().await? as f64);
        create_mf("formhub_sessions".to_string(), "Number of live dashboard sessions".to_string(), MetricType::GAUGE, metric)
    };

    metric_families.push(sessions);

    prometheus::TextEncoder::new()
        .encode_to_string(&metric_families)
        .map_err(internal_and_log)
}

#[inline]
fn create_mf(name: String, help: String, field_type: MetricType, metric: Metric) -> prometheus::proto::MetricFamily {
    let mut mf = prometheus::proto::MetricFamily::default();
    mf.set_name(name);
    mf.set_help(help);
    mf.set_field_type(field_type);
    mf.mut_metric().push(metric);
    mf
}

pub async fn track_metrics(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    let method = req.method().to_string();
    let route = http_route(&req).to_string();

    let start = Instant::now();

    // Call the next middleware or handler
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();

    REQUESTS
        .with_label_values(&[method.as_str(), route.as_str(), response.status().as_str()])
        .observe(latency);

    Ok(response)
}

#[inline]
fn http_route<B>(req: &Request<B>) -> &str {
    req.extensions()
        .get::<axum::extract::MatchedPath>()
        .map_or_else(|| "", |mp| mp.as_str())
}

pub static REQUESTS: LazyLock<prometheus::HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!("formhub_requests_count", "Number of requests", &["method", "uri", "code"], vec![0.025, 0.250, 0.500]).unwrap()
});

pub static BROADCASTS: LazyLock<prometheus::IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("formhub_broadcasts_total", "Number of broadcast operations", &["type"]).unwrap()
});

pub static EVICTIONS: LazyLock<prometheus::IntCounter> = LazyLock::new(|| {
    register_int_counter!("formhub_evictions_total", "Number of sessions closed for a full outbound queue").unwrap()
});

pub static MALFORMED_FRAMES: LazyLock<prometheus::IntCounter> = LazyLock::new(|| {
    register_int_counter!("formhub_malformed_frames_total", "Number of dropped control messages").unwrap()
});
