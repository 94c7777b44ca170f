//! Prometheus exposition for the admission-and-dispatch pipeline (C3).
//!
//! Four gauges mirror the load the scheduler is observing: `running_requests` and
//! `waiting_requests` are keyed by the display model name, `kv_cache_usage_percent` approximates
//! batched-token pressure, and `lora_info` reproduces vLLM's info-metric idiom of encoding the
//! current adapter sets as label *values* on a gauge that is always `1`.

use std::sync::Mutex;

use once_cell::sync::Lazy;
use prometheus::{GaugeVec, IntGaugeVec, Opts, Registry, TextEncoder};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static RUNNING_REQUESTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("running_requests", "Number of requests currently being processed"),
        &["model"],
    )
    .expect("running_requests gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register running_requests");
    gauge
});

static WAITING_REQUESTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new("waiting_requests", "Number of requests waiting to be processed"),
        &["model"],
    )
    .expect("waiting_requests gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register waiting_requests");
    gauge
});

static KV_CACHE_USAGE_PERCENT: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("kv_cache_usage_percent", "Approximate in-flight token cache pressure"),
        &["model"],
    )
    .expect("kv_cache_usage_percent gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register kv_cache_usage_percent");
    gauge
});

static LORA_INFO: Lazy<GaugeVec> = Lazy::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("lora_info", "Currently running and waiting LoRA adapters"),
        &["running_lora_adapters", "max_lora", "waiting_lora_adapters"],
    )
    .expect("lora_info gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("register lora_info");
    gauge
});

/// The previous `lora_info` label tuple, so a refresh can retract the stale series before
/// publishing a new one (the label values, not a numeric field, carry the state).
static LAST_LORA_LABELS: Lazy<Mutex<Option<[String; 3]>>> = Lazy::new(|| Mutex::new(None));

pub fn set_running_requests(model: &str, n: i64) {
    RUNNING_REQUESTS.with_label_values(&[model]).set(n);
}

pub fn set_waiting_requests(model: &str, n: i64) {
    WAITING_REQUESTS.with_label_values(&[model]).set(n);
}

pub fn set_kv_cache_usage_percent(model: &str, percent: f64) {
    KV_CACHE_USAGE_PERCENT.with_label_values(&[model]).set(percent);
}

/// Publishes the LoRA info gauge. `running` is the (sorted) set of adapter names currently
/// in use, `waiting` is a count of queued requests targeting a LoRA, `max` is the configured
/// adapter capacity (0 if unbounded).
pub fn set_lora_info(running: &[String], waiting: usize, max: usize) {
    let labels = [running.join(","), max.to_string(), waiting.to_string()];
    let mut last = LAST_LORA_LABELS.lock().unwrap();
    if let Some(prev) = last.as_ref() {
        if prev != &labels {
            let prev_refs: Vec<&str> = prev.iter().map(String::as_str).collect();
            let _ = LORA_INFO.remove_label_values(&prev_refs);
        }
    }
    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    LORA_INFO.with_label_values(&label_refs).set(1.0);
    *last = Some(labels);
}

/// Renders the full registry in Prometheus text exposition format.
pub fn render() -> String {
    let families = REGISTRY.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&families, &mut buf)
        .expect("prometheus encode");
    String::from_utf8(buf).expect("prometheus output is utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_includes_registered_families() {
        set_running_requests("m", 3);
        set_waiting_requests("m", 1);
        set_kv_cache_usage_percent("m", 12.5);
        set_lora_info(&["adapter-a".to_string()], 0, 4);
        let text = render();
        assert!(text.contains("running_requests"));
        assert!(text.contains("waiting_requests"));
        assert!(text.contains("kv_cache_usage_percent"));
        assert!(text.contains("lora_info"));
    }
}
