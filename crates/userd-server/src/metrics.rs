// ABOUTME: Request observability for userd: Prometheus hit/error/latency metrics per route and a persisted request counter.
// ABOUTME: A tower Layer records every routed request; failures to persist the counter are only logged.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tower::{Layer, Service};

/// Request latency buckets (seconds), 1ms through 10s.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

const ROUTE_LABELS: &[&str] = &["method", "route"];

/// Per-route Prometheus metrics labelled by method and matched route template.
/// Each instance owns its registry, so separate app states never share series.
#[derive(Clone)]
pub struct RouteMetrics {
    registry: Registry,
    hits: IntCounterVec,
    errors: IntCounterVec,
    latency: HistogramVec,
    request_count: IntGauge,
}

impl RouteMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hits = IntCounterVec::new(
            Opts::new("api_hits_total", "Total number of routed HTTP requests"),
            ROUTE_LABELS,
        )?;
        let errors = IntCounterVec::new(
            Opts::new("api_errors_total", "Responses with a status of 500 or above"),
            ROUTE_LABELS,
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("api_latency_seconds", "HTTP request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            ROUTE_LABELS,
        )?;
        let request_count = IntGauge::new(
            "userd_requests_total",
            "Requests served across restarts, from the persisted counter",
        )?;

        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(request_count.clone()))?;

        Ok(Self {
            registry,
            hits,
            errors,
            latency,
            request_count,
        })
    }

    pub fn record(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let labels = [method, route];
        self.hits.with_label_values(&labels).inc();
        // Touch the error series so every route reports an explicit zero.
        let errors = self.errors.with_label_values(&labels);
        if status >= 500 {
            errors.inc();
        }
        self.latency
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
    }

    pub fn hits(&self, method: &str, route: &str) -> u64 {
        self.hits.with_label_values(&[method, route]).get()
    }

    pub fn errors(&self, method: &str, route: &str) -> u64 {
        self.errors.with_label_values(&[method, route]).get()
    }

    pub fn latency_samples(&self, method: &str, route: &str) -> u64 {
        self.latency
            .with_label_values(&[method, route])
            .get_sample_count()
    }

    /// Encode every series in the Prometheus text format, reporting
    /// `total_requests` as the persisted request gauge.
    pub fn render(&self, total_requests: u64) -> Result<Vec<u8>, prometheus::Error> {
        self.request_count
            .set(i64::try_from(total_requests).unwrap_or(i64::MAX));

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Process-wide request count, optionally persisted to a text file holding
/// a single integer. A missing or unreadable file starts the count at zero.
#[derive(Debug)]
pub struct RequestCounter {
    count: AtomicU64,
    path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl RequestCounter {
    /// Load the counter from `path`, which is rewritten on every increment.
    pub fn load(path: &Path) -> Self {
        let count = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        tracing::info!("request counter at {} starts from {}", path.display(), count);
        Self {
            count: AtomicU64::new(count),
            path: Some(path.to_path_buf()),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A counter that lives only in memory.
    pub fn ephemeral() -> Self {
        Self {
            count: AtomicU64::new(0),
            path: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Bump the count and persist it. Never fails the caller.
    pub async fn increment(&self) -> u64 {
        let value = self.count.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(path) = &self.path {
            let _guard = self.persist_lock.lock().await;
            // Write the latest value so racing increments never move the file backwards.
            let latest = self.get();
            if let Err(e) = tokio::fs::write(path, latest.to_string()).await {
                tracing::warn!("failed to persist request counter to {}: {}", path.display(), e);
            }
        }

        value
    }
}

/// A tower Layer that records route stats and bumps the request counter.
/// Install with `Router::route_layer` so the matched route template is known.
#[derive(Clone)]
pub struct MetricsLayer {
    metrics: Arc<RouteMetrics>,
    counter: Arc<RequestCounter>,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<RouteMetrics>, counter: Arc<RequestCounter>) -> Self {
        Self { metrics, counter }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsMiddleware {
            inner,
            metrics: Arc::clone(&self.metrics),
            counter: Arc::clone(&self.counter),
        }
    }
}

#[derive(Clone)]
pub struct MetricsMiddleware<S> {
    inner: S,
    metrics: Arc<RouteMetrics>,
    counter: Arc<RequestCounter>,
}

impl<S> Service<Request<Body>> for MetricsMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| req.uri().path().to_string());
        let method = req.method().to_string();

        let metrics = Arc::clone(&self.metrics);
        let counter = Arc::clone(&self.counter);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let started = Instant::now();
            counter.increment().await;
            let result = inner.call(req).await;
            let status = match &result {
                Ok(resp) => resp.status().as_u16(),
                Err(_) => 500,
            };
            metrics.record(&method, &route, status, started.elapsed());
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn route_metrics_count_hits_errors_and_latency() {
        let metrics = RouteMetrics::new().unwrap();
        metrics.record("GET", "/users", 200, Duration::from_micros(10));
        metrics.record("GET", "/users", 503, Duration::from_micros(30));
        metrics.record("POST", "/users", 201, Duration::from_micros(5));

        assert_eq!(metrics.hits("GET", "/users"), 2);
        assert_eq!(metrics.errors("GET", "/users"), 1);
        assert_eq!(metrics.latency_samples("GET", "/users"), 2);
        assert_eq!(metrics.hits("POST", "/users"), 1);
        assert_eq!(metrics.errors("POST", "/users"), 0);
    }

    #[test]
    fn render_emits_prometheus_text() {
        let metrics = RouteMetrics::new().unwrap();
        metrics.record("GET", "/users/{id}", 404, Duration::from_millis(3));

        let text = String::from_utf8(metrics.render(7).unwrap()).unwrap();

        assert!(text.contains("# TYPE api_hits_total counter"));
        assert!(text.contains("# TYPE api_latency_seconds histogram"));
        assert!(text.contains("route=\"/users/{id}\""));
        assert!(text.contains("userd_requests_total 7"));
        let errors = text
            .lines()
            .find(|l| l.starts_with("api_errors_total{"))
            .unwrap();
        assert!(errors.ends_with(" 0"), "client errors are not server errors: {errors}");
    }

    #[test]
    fn separate_instances_do_not_share_series() {
        let a = RouteMetrics::new().unwrap();
        let b = RouteMetrics::new().unwrap();
        a.record("GET", "/health", 200, Duration::from_micros(1));

        assert_eq!(a.hits("GET", "/health"), 1);
        assert_eq!(b.hits("GET", "/health"), 0);
    }

    #[tokio::test]
    async fn request_counter_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.txt");

        let counter = RequestCounter::load(&path);
        assert_eq!(counter.get(), 0);
        counter.increment().await;
        counter.increment().await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2");

        let reloaded = RequestCounter::load(&path);
        assert_eq!(reloaded.get(), 2);
        assert_eq!(reloaded.increment().await, 3);
    }

    #[tokio::test]
    async fn request_counter_treats_garbage_as_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.txt");
        std::fs::write(&path, "not a number").unwrap();

        let counter = RequestCounter::load(&path);
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn ephemeral_counter_writes_nothing() {
        let counter = RequestCounter::ephemeral();
        assert_eq!(counter.increment().await, 1);
        assert_eq!(counter.get(), 1);
    }
}
