use bench_core::ChannelHub;
use bench_io::metrics::{init_metrics, record_sample, serve_metrics, ESTOP_ASSERTED};
use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::Duration;
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Mirror the latest published telemetry into the gauges every 200 ms.
pub fn start_metrics_updater(
    hub: Arc<ChannelHub>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            for sample in hub.snapshot() {
                record_sample(&sample);
            }
            ESTOP_ASSERTED.set(if hub.estop_asserted() { 1.0 } else { 0.0 });

            thread::sleep(Duration::from_millis(200));
        }
    })
}
