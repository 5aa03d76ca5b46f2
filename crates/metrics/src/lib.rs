//! Minimal metrics registration helpers: a single process-wide
//! `prometheus` registry plus macros that register-and-store a metric in
//! a `once_cell::sync::Lazy` static, so call sites declare a metric once
//! at its definition site instead of threading a registry handle around.

pub use once_cell::sync::Lazy;
pub use prometheus;
use prometheus::{
    Histogram,
    HistogramOpts,
    IntCounter,
    IntGauge,
    Registry,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Register an `IntCounter` under `REGISTRY` and expose it as a
/// `once_cell::sync::Lazy<IntCounter>` static.
#[macro_export]
macro_rules! register_counter {
    ($name:ident, $help:literal) => {
        pub static $name: $crate::Lazy<$crate::prometheus::IntCounter> = $crate::Lazy::new(|| {
            let counter = $crate::prometheus::IntCounter::new(stringify!($name), $help)
                .expect("metric registration failed");
            $crate::REGISTRY
                .register(Box::new(counter.clone()))
                .expect("metric registration failed");
            counter
        });
    };
}

#[macro_export]
macro_rules! register_gauge {
    ($name:ident, $help:literal) => {
        pub static $name: $crate::Lazy<$crate::prometheus::IntGauge> = $crate::Lazy::new(|| {
            let gauge = $crate::prometheus::IntGauge::new(stringify!($name), $help)
                .expect("metric registration failed");
            $crate::REGISTRY
                .register(Box::new(gauge.clone()))
                .expect("metric registration failed");
            gauge
        });
    };
}

#[macro_export]
macro_rules! register_histogram {
    ($name:ident, $help:literal) => {
        pub static $name: $crate::Lazy<$crate::prometheus::Histogram> = $crate::Lazy::new(|| {
            let histogram = $crate::prometheus::Histogram::with_opts(
                $crate::prometheus::HistogramOpts::new(stringify!($name), $help),
            )
            .expect("metric registration failed");
            $crate::REGISTRY
                .register(Box::new(histogram.clone()))
                .expect("metric registration failed");
            histogram
        });
    };
}

/// RAII timer: observes elapsed seconds into a histogram when dropped.
pub struct Timer<'a> {
    histogram: &'a Histogram,
    start: std::time::Instant,
}

impl<'a> Timer<'a> {
    pub fn new(histogram: &'a Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

pub fn log_counter(counter: &IntCounter, delta: u64) {
    counter.inc_by(delta);
}

pub fn log_gauge(gauge: &IntGauge, value: i64) {
    gauge.set(value);
}

pub fn new_histogram(name: &str, help: &str) -> Histogram {
    Histogram::with_opts(HistogramOpts::new(name, help)).expect("metric registration failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    register_counter!(TEST_METRICS_DEMO_TOTAL, "a demo counter for tests");

    #[test]
    fn counter_registers_and_increments() {
        log_counter(&TEST_METRICS_DEMO_TOTAL, 3);
        assert_eq!(TEST_METRICS_DEMO_TOTAL.get(), 3);
    }
}
