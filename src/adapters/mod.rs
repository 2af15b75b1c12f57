//! Source adapters.
//!
//! Each adapter owns one upstream resource, fetches or receives raw
//! payloads, runs them through the parser chain, and emits canonical
//! reports onto the shared fusion channel tagged with its description.
//! Adapters are chosen by an accepts-probe over the resource URI, in
//! priority order; a supervisor tick restarts any adapter whose task died.

mod polling;
mod post;
mod social;
mod websocket;

pub use polling::{Poller, PollerKind};
pub use post::PostAdapter;
pub use social::SocialStreamAdapter;
pub use websocket::WebSocketAdapter;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AdapterError;
use crate::parsers::ParserChain;
use crate::runtime::{worker, Slowdown};
use crate::types::Report;

/// Supervisor cadence.
pub const SUPERVISOR_TICK: Duration = Duration::from_secs(30);

/// Everything an adapter needs to run.
#[derive(Clone)]
pub struct AdapterContext {
    pub parser: Arc<ParserChain>,
    pub reports: mpsc::Sender<(Report, String)>,
    pub slowdown: Arc<Slowdown>,
    /// Bounds concurrent payload parsing across HTTP pollers.
    pub parse_gate: Arc<Semaphore>,
    /// Alerter handles for social streams.
    pub friends: Vec<String>,
}

/// A live adapter task.
pub struct RunningAdapter {
    pub resource: String,
    pub kind: &'static str,
    handle: worker::WorkerHandle,
}

impl RunningAdapter {
    pub fn running(&self) -> bool {
        self.handle.running()
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}

fn scheme(resource: &str) -> &str {
    resource.split("://").next().unwrap_or("")
}

/// Start the adapter for a resource. Probes in priority order: FDSN,
/// WebSocket, social stream, POST push, then plain HTTP polling. Unknown
/// schemes fail.
pub fn start(resource: &str, ctx: &AdapterContext) -> Result<RunningAdapter, AdapterError> {
    let resource = resource.to_string();

    let (kind, handle) = match scheme(&resource) {
        "fdsn" => {
            let poller = Poller::new(resource.clone(), PollerKind::Fdsn);
            let ctx = ctx.clone();
            (
                "fdsn",
                worker::spawn("fdsn-poller", move |cancel| poller.run(ctx, cancel)),
            )
        }
        "social" | "social+ws" | "social+wss" => {
            let adapter = SocialStreamAdapter::new(resource.clone(), ctx.friends.clone());
            let ctx = ctx.clone();
            (
                "social",
                worker::spawn("social-stream", move |cancel| adapter.run(ctx, cancel)),
            )
        }
        "ws" | "wss" => {
            let adapter = WebSocketAdapter::new(resource.clone());
            let ctx = ctx.clone();
            (
                "websocket",
                worker::spawn("websocket", move |cancel| adapter.run(ctx, cancel)),
            )
        }
        "post" => {
            let adapter = PostAdapter::new(resource.clone());
            let ctx = ctx.clone();
            (
                "post",
                worker::spawn("post-push", move |cancel| adapter.run(ctx, cancel)),
            )
        }
        "http" | "https" => {
            let poller = Poller::new(resource.clone(), PollerKind::Http);
            let ctx = ctx.clone();
            (
                "http",
                worker::spawn("http-poller", move |cancel| poller.run(ctx, cancel)),
            )
        }
        other => {
            return Err(AdapterError::Unsupported(format!(
                "no adapter accepts scheme {other:?}"
            )))
        }
    };

    info!(resource, kind, "adapter started");
    Ok(RunningAdapter {
        resource,
        kind,
        handle,
    })
}

/// Owns the adapter fleet and keeps it alive.
pub struct AdapterSet {
    ctx: AdapterContext,
    adapters: tokio::sync::Mutex<Vec<RunningAdapter>>,
}

impl AdapterSet {
    pub fn new(ctx: AdapterContext) -> Self {
        Self {
            ctx,
            adapters: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn add(&self, resource: &str) -> Result<(), AdapterError> {
        let adapter = start(resource, &self.ctx)?;
        self.adapters.lock().await.push(adapter);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.adapters.lock().await.len()
    }

    /// One supervisor pass: dead adapters are rebuilt from their resource.
    pub async fn supervise(&self) {
        let mut adapters = self.adapters.lock().await;
        let mut rebuilt = Vec::new();

        adapters.retain(|adapter| {
            if adapter.running() {
                true
            } else {
                warn!(
                    resource = adapter.resource,
                    kind = adapter.kind,
                    "adapter died, restarting"
                );
                rebuilt.push(adapter.resource.clone());
                false
            }
        });

        for resource in rebuilt {
            match start(&resource, &self.ctx) {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => warn!(resource, error = %e, "adapter restart failed"),
            }
        }
    }

    /// Supervisor loop; ticks until cancelled.
    pub async fn run_supervisor(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(SUPERVISOR_TICK) => self.supervise().await,
                () = cancel.cancelled() => break,
            }
        }
        let adapters = self.adapters.lock().await;
        for adapter in adapters.iter() {
            adapter.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::BuiltinRegions;
    use crate::parsers::{CsvParser, GeoJsonParser};

    fn context() -> (AdapterContext, mpsc::Receiver<(Report, String)>) {
        let (tx, rx) = mpsc::channel(64);
        let parser = Arc::new(ParserChain::new(vec![
            Arc::new(GeoJsonParser),
            Arc::new(CsvParser),
        ]));
        let _ = BuiltinRegions;
        (
            AdapterContext {
                parser,
                reports: tx,
                slowdown: Slowdown::new(),
                parse_gate: Arc::new(Semaphore::new(2)),
                friends: Vec::new(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn unknown_scheme_rejected() {
        let (ctx, _rx) = context();
        assert!(start("gopher://example.org/feed", &ctx).is_err());
    }

    #[tokio::test]
    async fn known_schemes_start_and_stop() {
        let (ctx, _rx) = context();
        // Points at nothing; the task must still start and stay supervised.
        let adapter = start("http://127.0.0.1:9/feed.geojson", &ctx).expect("starts");
        assert!(adapter.running());
        adapter.stop();
    }

    #[tokio::test]
    async fn supervisor_restarts_dead_adapters() {
        let (ctx, _rx) = context();
        let set = AdapterSet::new(ctx);
        set.add("http://127.0.0.1:9/feed.geojson").await.expect("adds");

        {
            let adapters = set.adapters.lock().await;
            adapters[0].stop();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        set.supervise().await;
        let adapters = set.adapters.lock().await;
        assert_eq!(adapters.len(), 1);
        assert!(adapters[0].running());
    }
}
