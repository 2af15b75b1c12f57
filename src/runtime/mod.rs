//! Concurrency scaffolding: the global slowdown factor and the bounded
//! worker abstraction shared by adapters, the fusion engine and the monitor.

pub mod worker;

pub use worker::WorkerHandle;

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Factor above which the process must be restarted by the host.
pub const SLOWDOWN_FATAL: f64 = 64.0;

/// Global throttle driven by end-to-end latency.
///
/// Every polling adapter multiplies its period by the factor and divides its
/// per-cycle parse limit by it; the monitor raises it when notices arrive
/// late and decays it back toward 1.0 when the pipeline is healthy.
#[derive(Debug)]
pub struct Slowdown {
    factor: ArcSwap<f64>,
}

impl Slowdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            factor: ArcSwap::from_pointee(1.0),
        })
    }

    pub fn factor(&self) -> f64 {
        **self.factor.load()
    }

    /// Multiply the factor (monitor latency penalty).
    pub fn scale(&self, multiplier: f64) {
        let next = (self.factor() * multiplier).max(1.0);
        self.factor.store(Arc::new(next));
    }

    /// Decay toward 1.0 (healthy pipeline).
    pub fn relax(&self) {
        self.scale(0.8);
    }

    /// True once the backlog is beyond saving.
    pub fn is_fatal(&self) -> bool {
        self.factor() > SLOWDOWN_FATAL
    }
}
