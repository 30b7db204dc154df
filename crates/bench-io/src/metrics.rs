//! Prometheus metrics for the motor bench.
//!
//! Tick-domain counters are fed by the runtime's fault sink; the bridge
//! feeds the remote-side counters directly.

use bench_core::{TelemetryField, TelemetrySample};
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
}

fn gauge(name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
}

// ============================================================================
// Control Tick Metrics
// ============================================================================

pub static TICKS_EXECUTED: LazyLock<IntCounter> =
    LazyLock::new(|| counter("motorbench_ticks_executed_total", "Control ticks executed"));

pub static TICKS_OVERRUN: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_ticks_overrun_total",
        "Control ticks that took longer than the configured period",
    )
});

/// Tick duration distribution in microseconds
pub static TICK_DURATION_US: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "motorbench_tick_duration_us",
            "Control tick duration distribution in microseconds",
        )
        .buckets(vec![
            10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 20000.0,
        ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

pub static ESTOP_TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_estop_ticks_total",
        "Ticks executed with the emergency stop asserted",
    )
});

/// Emergency stop state (1 = asserted)
pub static ESTOP_ASSERTED: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "motorbench_estop_asserted",
        "Emergency stop state (1=asserted, 0=released)",
    )
});

// ============================================================================
// Command Metrics
// ============================================================================

pub static COMMANDS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_commands_received_total",
        "Remote commands posted to a device latch",
    )
});

pub static COMMANDS_APPLIED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_commands_applied_total",
        "Drained commands applied to a device",
    )
});

pub static COMMANDS_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_commands_dropped_total",
        "Drained commands dropped as invalid",
    )
});

pub static APPLY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_apply_failures_total",
        "Device writes (including emergency stops) that failed",
    )
});

pub static READ_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_read_failures_total",
        "Telemetry reads that failed and republished a stale value",
    )
});

// ============================================================================
// Bridge Metrics
// ============================================================================

/// Bridge client connection status (1 = connected, 0 = disconnected)
pub static BRIDGE_CONNECTED: LazyLock<Gauge> = LazyLock::new(|| {
    gauge(
        "motorbench_bridge_connected",
        "Bridge client connection status (1=connected, 0=disconnected)",
    )
});

pub static PROTOCOL_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    counter(
        "motorbench_protocol_errors_total",
        "Inbound bridge lines that could not be delivered",
    )
});

// ============================================================================
// Device Telemetry
// ============================================================================

/// Latest published telemetry, labelled by device and field.
pub static DEVICE_TELEMETRY: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("motorbench_device_telemetry", "Latest published device telemetry"),
        &["device", "field"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Mirror one sample into the telemetry gauges.
pub fn record_sample(sample: &TelemetrySample) {
    let device = sample.device.to_string();
    for field in TelemetryField::ALL {
        DEVICE_TELEMETRY
            .with_label_values(&[device.as_str(), field.key()])
            .set(sample.get(field));
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let mut buffer = Vec::new();
                    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once the first tick has published.
                    if TICKS_EXECUTED.get() > 0 {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = TICKS_EXECUTED.get();
    let _ = TICKS_OVERRUN.get();
    let _ = TICK_DURATION_US.get_sample_count();
    let _ = ESTOP_TICKS.get();
    let _ = ESTOP_ASSERTED.get();
    let _ = COMMANDS_RECEIVED.get();
    let _ = COMMANDS_APPLIED.get();
    let _ = COMMANDS_DROPPED.get();
    let _ = APPLY_FAILURES.get();
    let _ = READ_FAILURES.get();
    let _ = BRIDGE_CONNECTED.get();
    let _ = PROTOCOL_ERRORS.get();
    LazyLock::force(&DEVICE_TELEMETRY);
}
