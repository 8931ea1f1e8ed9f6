// SPDX-License-Identifier: Apache-2.0 OR MIT
#![cfg_attr(not(feature = "telemetry"), allow(dead_code))]

#[cfg(feature = "telemetry")]
mod otel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;
    use std::time::Duration;

    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::KeyValue;

    const METER_NAME: &str = "veltl_engine";

    static ENABLED: AtomicBool = AtomicBool::new(false);
    static HANDLES: OnceLock<Handles> = OnceLock::new();

    struct Handles {
        render_hist: Histogram<f64>,
        render_counter: Counter<u64>,
        directive_counter: Counter<u64>,
    }

    impl Handles {
        fn new() -> Self {
            let meter = global::meter(METER_NAME);
            let render_hist = meter
                .f64_histogram("veltl.render.duration_ms")
                .with_description("Render duration in milliseconds")
                .init();
            let render_counter = meter
                .u64_counter("veltl.render.count")
                .with_description("Completed render calls")
                .init();
            let directive_counter = meter
                .u64_counter("veltl.directive.count")
                .with_description("Directive executions by name")
                .init();
            Self {
                render_hist,
                render_counter,
                directive_counter,
            }
        }
    }

    fn handles() -> Option<&'static Handles> {
        if ENABLED.load(Ordering::Relaxed) {
            Some(HANDLES.get_or_init(Handles::new))
        } else {
            None
        }
    }

    /// Turns metric recording on for this process.
    pub fn enable() {
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn record_render(name: &str, duration: Duration, ok: bool) {
        if let Some(handles) = handles() {
            let attributes = [
                KeyValue::new("template", name.to_string()),
                KeyValue::new("outcome", if ok { "ok" } else { "error" }),
            ];
            handles
                .render_hist
                .record(duration.as_secs_f64() * 1000.0, &attributes);
            handles.render_counter.add(1, &attributes);
        }
    }

    pub fn record_directive(name: &str) {
        if let Some(handles) = handles() {
            let attributes = [KeyValue::new("directive", name.to_string())];
            handles.directive_counter.add(1, &attributes);
        }
    }
}

#[cfg(feature = "telemetry")]
pub use otel::{enable, record_directive, record_render};

#[cfg(not(feature = "telemetry"))]
pub fn enable() {}

#[cfg(not(feature = "telemetry"))]
pub fn record_render(_name: &str, _duration: std::time::Duration, _ok: bool) {}

#[cfg(not(feature = "telemetry"))]
pub fn record_directive(_name: &str) {}
