use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use dashmap::DashMap;

#[derive(Debug, Default)]
struct MethodStats {
    calls: AtomicU64,
    errors: AtomicU64,
    duration_micros: AtomicU64,
}

#[derive(Debug, Default)]
pub struct Metrics {
    request_total: AtomicU64,
    request_success: AtomicU64,
    request_error: AtomicU64,
    policy_cache_hits: AtomicU64,
    policy_cache_misses: AtomicU64,
    methods: DashMap<&'static str, MethodStats>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.request_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.request_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_total(&self) -> u64 {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn request_success(&self) -> u64 {
        self.request_success.load(Ordering::Relaxed)
    }

    pub fn request_error(&self) -> u64 {
        self.request_error.load(Ordering::Relaxed)
    }

    pub fn record_policy_cache_hit(&self) {
        self.policy_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_cache_miss(&self) {
        self.policy_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn policy_cache_hits(&self) -> u64 {
        self.policy_cache_hits.load(Ordering::Relaxed)
    }

    pub fn policy_cache_misses(&self) -> u64 {
        self.policy_cache_misses.load(Ordering::Relaxed)
    }

    /// Counts one engine call under `method`.
    pub fn record_method(&self, method: &'static str, elapsed: Duration, failed: bool) {
        let stats = self.methods.entry(method).or_default();
        stats.calls.fetch_add(1, Ordering::Relaxed);
        if failed {
            stats.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        stats.duration_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn method_calls(&self, method: &str) -> u64 {
        self.methods
            .get(method)
            .map_or(0, |s| s.calls.load(Ordering::Relaxed))
    }

    pub fn method_errors(&self, method: &str) -> u64 {
        self.methods
            .get(method)
            .map_or(0, |s| s.errors.load(Ordering::Relaxed))
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();
        counter(
            &mut output,
            "corral_requests_total",
            "Total number of HTTP requests.",
            self.request_total(),
        );
        counter(
            &mut output,
            "corral_requests_success_total",
            "Total successful HTTP requests.",
            self.request_success(),
        );
        counter(
            &mut output,
            "corral_requests_error_total",
            "Total failed HTTP requests.",
            self.request_error(),
        );
        counter(
            &mut output,
            "corral_policy_cache_hits_total",
            "Policy cache hits.",
            self.policy_cache_hits(),
        );
        counter(
            &mut output,
            "corral_policy_cache_misses_total",
            "Policy cache misses.",
            self.policy_cache_misses(),
        );

        let mut methods: Vec<_> = self
            .methods
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (
                    *entry.key(),
                    stats.calls.load(Ordering::Relaxed),
                    stats.errors.load(Ordering::Relaxed),
                    stats.duration_micros.load(Ordering::Relaxed),
                )
            })
            .collect();
        methods.sort_unstable_by_key(|(name, ..)| *name);

        output.push_str("# HELP corral_method_calls_total Engine calls per method.\n");
        output.push_str("# TYPE corral_method_calls_total counter\n");
        for (name, calls, _, _) in &methods {
            let _ = writeln!(output, "corral_method_calls_total{{method=\"{name}\"}} {calls}");
        }
        output.push_str("# HELP corral_method_errors_total Failed engine calls per method.\n");
        output.push_str("# TYPE corral_method_errors_total counter\n");
        for (name, _, errors, _) in &methods {
            let _ = writeln!(output, "corral_method_errors_total{{method=\"{name}\"}} {errors}");
        }
        output.push_str(
            "# HELP corral_method_duration_microseconds_total Time spent per method.\n",
        );
        output.push_str("# TYPE corral_method_duration_microseconds_total counter\n");
        for (name, _, _, micros) in &methods {
            let _ = writeln!(
                output,
                "corral_method_duration_microseconds_total{{method=\"{name}\"}} {micros}"
            );
        }
        output
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    let _ = writeln!(output, "{name} {value}");
}

pub async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics.render_prometheus(),
    )
}
