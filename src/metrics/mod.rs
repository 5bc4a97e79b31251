// src/metrics/mod.rs
// Prometheus metrics for the memory engine. No HTTP /metrics route lives here
// (out of scope); a host process exports PROMETHEUS_HANDLE.render() itself.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Active supervised child processes (C8).
static ACTIVE_PROCESSES: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus metrics exporter. Call once at process startup.
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("Prometheus handle already initialized");

    info!("Prometheus metrics initialized");
}

/// Render the current metrics snapshot, for a host process to expose however it likes.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a retrieval/orchestration request (counter)
pub fn record_request(request_type: &str) {
    counter!("memoria_requests_total", "type" => request_type.to_string()).increment(1);
}

/// Record request duration (histogram)
pub fn record_request_duration(request_type: &str, duration_seconds: f64) {
    histogram!("memoria_request_duration_seconds", "type" => request_type.to_string())
        .record(duration_seconds);
}

/// Record an LLM provider call (C3)
pub fn record_llm_call(model: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("memoria_llm_calls_total", "model" => model.to_string(), "status" => status)
        .increment(1);
}

/// Record a cooldown/key-exhaustion event (C9)
pub fn record_cooldown_event(resource: &str, kind: &str) {
    counter!("memoria_cooldown_events_total", "resource" => resource.to_string(), "kind" => kind.to_string())
        .increment(1);
}

/// Track active supervised processes (C8)
pub fn process_spawned() {
    let count = ACTIVE_PROCESSES.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("memoria_active_processes").set(count as f64);
}

pub fn process_reaped() {
    let count = ACTIVE_PROCESSES.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("memoria_active_processes").set(count as f64);
}

/// Record tokens used in an LLM response
pub fn record_tokens(prompt_tokens: u64, completion_tokens: u64, reasoning_tokens: u64) {
    counter!("memoria_llm_tokens_total", "type" => "prompt").increment(prompt_tokens);
    counter!("memoria_llm_tokens_total", "type" => "completion").increment(completion_tokens);
    counter!("memoria_llm_tokens_total", "type" => "reasoning").increment(reasoning_tokens);
}

/// Record a tool-orchestrator tool execution (C6)
pub fn record_tool_execution(tool_name: &str, success: bool, duration_seconds: f64) {
    let status = if success { "success" } else { "error" };
    counter!("memoria_tool_executions_total", "tool" => tool_name.to_string(), "status" => status)
        .increment(1);
    histogram!("memoria_tool_execution_duration_seconds", "tool" => tool_name.to_string())
        .record(duration_seconds);
}

/// Helper for timing operations
pub struct RequestTimer {
    start: Instant,
    request_type: String,
}

impl RequestTimer {
    pub fn new(request_type: &str) -> Self {
        record_request(request_type);
        Self {
            start: Instant::now(),
            request_type: request_type.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request_duration(&self.request_type, duration);
    }
}
