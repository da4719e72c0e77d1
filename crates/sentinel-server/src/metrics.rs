use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use sentinel_types::{ScenarioKind, Severity};
use std::net::SocketAddr;
use std::time::Duration;

/// 初始化 Prometheus metrics exporter
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!("Metrics exporter started on http://{}/metrics", addr);
    Ok(())
}

/// 描述所有指标
fn describe_metrics() {
    // 周期
    describe_counter!("sentinel_cycles_total", "Total number of completed analysis cycles");
    describe_counter!(
        "sentinel_cycle_failures_total",
        "Total number of skipped cycles by error kind"
    );
    describe_histogram!(
        "sentinel_cycle_duration_seconds",
        "Analysis cycle duration in seconds"
    );
    describe_gauge!("sentinel_instances", "Number of monitored instances");

    // 检测与抑制
    describe_counter!("sentinel_findings_total", "Total number of findings by scenario");
    describe_counter!("sentinel_alerts_emitted_total", "Total number of alerts emitted");
    describe_counter!(
        "sentinel_alerts_suppressed_total",
        "Total number of findings suppressed as duplicates"
    );
    describe_counter!(
        "sentinel_degraded_cycles_total",
        "Total number of cycles run with an optional feature unavailable"
    );

    // 发送
    describe_gauge!("sentinel_dispatch_queue_depth", "Alerts waiting in the dispatch queue");
    describe_counter!(
        "sentinel_dispatch_success_total",
        "Total number of alerts delivered by channel"
    );
    describe_counter!(
        "sentinel_dispatch_failure_total",
        "Total number of failed deliveries by channel"
    );
    describe_counter!(
        "sentinel_dispatch_dropped_total",
        "Total number of alerts dropped on queue overflow"
    );
}

pub fn record_cycle(instance_id: &str, elapsed: Duration) {
    counter!("sentinel_cycles_total", 1, "instance" => instance_id.to_string());
    histogram!(
        "sentinel_cycle_duration_seconds",
        elapsed.as_secs_f64(),
        "instance" => instance_id.to_string()
    );
}

pub fn record_cycle_failure(instance_id: &str, kind: &'static str) {
    counter!(
        "sentinel_cycle_failures_total",
        1,
        "instance" => instance_id.to_string(),
        "kind" => kind
    );
}

pub fn record_degraded(instance_id: &str, feature: String) {
    counter!(
        "sentinel_degraded_cycles_total",
        1,
        "instance" => instance_id.to_string(),
        "feature" => feature
    );
}

pub fn record_finding(kind: ScenarioKind) {
    counter!("sentinel_findings_total", 1, "scenario" => kind.as_str());
}

pub fn record_emitted(severity: Severity) {
    counter!("sentinel_alerts_emitted_total", 1, "severity" => severity.as_str());
}

pub fn record_suppressed(severity: Severity) {
    counter!("sentinel_alerts_suppressed_total", 1, "severity" => severity.as_str());
}

pub fn set_instances(count: usize) {
    gauge!("sentinel_instances", count as f64);
}
