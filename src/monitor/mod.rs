//! The monitor: consumes notices, measures end-to-end latency, drives the
//! global slowdown factor, and dispatches rendered messages to subscribers.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Domain, DomainContext};
use crate::error::FatalError;
use crate::geo::RegionIndex;
use crate::notice::{message, Notice};
use crate::runtime::Slowdown;
use crate::sinks::Sink;
use crate::types::Status;

/// Latency (seconds) past which the pipeline is considered lagging.
const LAG_WARN_SECS: i64 = 60;
/// Lagging low-confidence notices past this age are not worth delivering.
const LAG_DROP_SECS: i64 = 120;

/// One recipient: a sink plus the domains it subscribed to, in order.
pub struct Subscriber {
    pub sink: Arc<dyn Sink>,
    pub domains: Vec<Arc<Domain>>,
    /// Preferred languages; `None` means "the event region's languages".
    pub languages: Option<Vec<String>>,
}

pub struct Monitor {
    subscribers: Vec<Subscriber>,
    ctx: DomainContext,
    regions: Arc<dyn RegionIndex>,
    slowdown: Arc<Slowdown>,
    /// One lock per region: while a notice for a region is being dispatched,
    /// lower-quality notices for the same region are dropped.
    region_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Deliveries per provider/source, for blame and diagnostics.
    dispatch_counts: DashMap<String, u64>,
    /// EMA of per-provider notice latency.
    provider_delays: DashMap<String, f64>,
}

impl Monitor {
    pub fn new(
        mut subscribers: Vec<Subscriber>,
        ctx: DomainContext,
        regions: Arc<dyn RegionIndex>,
        slowdown: Arc<Slowdown>,
    ) -> Self {
        subscribers.sort_by_key(|s| std::cmp::Reverse(s.sink.priority()));
        Self {
            subscribers,
            ctx,
            regions,
            slowdown,
            region_locks: DashMap::new(),
            dispatch_counts: DashMap::new(),
            provider_delays: DashMap::new(),
        }
    }

    fn region_lock(&self, region: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.region_locks
            .entry(region.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Latency bookkeeping. Returns false when the notice should be
    /// dropped, Err when the backlog is terminal.
    fn meter(&self, notice: &Notice) -> Result<bool, FatalError> {
        let delay = (Utc::now() - notice.timestamp).num_seconds();

        let mut entry = self
            .provider_delays
            .entry(notice.provider.clone())
            .or_insert(0.0);
        *entry = *entry * 0.9 + delay as f64 * 0.1;
        drop(entry);

        if delay > LAG_WARN_SECS {
            let blame = self
                .provider_delays
                .iter()
                .max_by(|a, b| {
                    a.value()
                        .partial_cmp(b.value())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|e| e.key().clone())
                .unwrap_or_default();
            warn!(delay, blame, "notice delayed");
            self.slowdown.scale(1.0 + delay as f64 / 600.0);

            if self.slowdown.is_fatal() {
                return Err(FatalError::Overloaded {
                    factor: self.slowdown.factor(),
                });
            }
            if notice.confidence() < 0.3 && delay > LAG_DROP_SECS {
                return Ok(false);
            }
        } else if delay < 10 {
            self.slowdown.relax();
        }

        Ok(true)
    }

    /// Dispatch one notice to every subscriber it concerns. Each subscriber
    /// receives at most one domain's message stream per notice; the first
    /// domain that produces content claims them.
    pub async fn consume(&self, notice: Notice) -> Result<(), FatalError> {
        if !self.meter(&notice)? {
            return Ok(());
        }

        if notice.event.score < 0.0 || notice.timely().is_none() {
            return Ok(());
        }

        let lock = self.region_lock(&notice.event.region);
        let _guard = if notice.event.status <= Status::Guessed {
            // A better notice for this region is already going out; the
            // guessed one adds nothing.
            match lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(region = notice.event.region, "region busy, dropping guessed notice");
                    return Ok(());
                }
            }
        } else {
            lock.lock().await
        };

        let urgent = notice.early(&self.ctx.travel);
        let mut delivered: HashMap<&str, String> = HashMap::new();

        for subscriber in &self.subscribers {
            if delivered.contains_key(subscriber.sink.name()) {
                continue;
            }

            for domain in &subscriber.domains {
                let mut owned = notice.clone();
                let Some(relevance) = domain.relevance(&mut owned, &self.ctx) else {
                    continue;
                };

                let languages = subscriber.languages.clone().unwrap_or_else(|| {
                    self.regions.languages(&owned.event.region)
                });

                let title = message::title(&owned, &languages);
                let lines: Vec<String> = message::Messages::new(
                    &owned,
                    domain,
                    &self.ctx,
                    relevance,
                    subscriber.sink.style(),
                    languages,
                )
                .collect();

                if lines.is_empty() {
                    continue;
                }

                for line in lines {
                    let thread = subscriber
                        .sink
                        .send(
                            &title,
                            &line,
                            &owned.event.coords,
                            &owned.tag,
                            &[],
                            urgent && !domain.debug,
                        )
                        .await;
                    if thread.is_none() {
                        warn!(sink = subscriber.sink.name(), "delivery failed");
                    }
                }

                info!(
                    sink = subscriber.sink.name(),
                    domain = domain.describe(),
                    reason = %relevance,
                    region = owned.event.region,
                    "notice dispatched"
                );

                domain.remember(&owned, &self.ctx);
                delivered.insert(subscriber.sink.name(), domain.describe());
                self.log_dispatch(&owned);
                break;
            }
        }

        Ok(())
    }

    fn log_dispatch(&self, notice: &Notice) {
        *self
            .dispatch_counts
            .entry(notice.provider.clone())
            .or_insert(0) += 1;
        for source in &notice.event.sources {
            *self.dispatch_counts.entry(source.clone()).or_insert(0) += 1;
        }
    }

    /// Providers/sources by delivered-notice count.
    pub fn dispatch_counts(&self) -> Vec<(String, u64)> {
        let mut counts: Vec<(String, u64)> = self
            .dispatch_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }

    /// Most recently considered notice per named domain (`lastquake`).
    pub fn last_notices(&self) -> Vec<(String, Notice)> {
        let mut out = Vec::new();
        for subscriber in &self.subscribers {
            for domain in &subscriber.domains {
                if let Some(notice) = domain.last_notice() {
                    out.push((domain.describe(), notice));
                }
            }
        }
        out.sort_by(|a, b| b.1.event.time.cmp(&a.1.event.time));
        out
    }

    /// Monitor worker loop.
    pub async fn run(
        self: Arc<Self>,
        mut notices: mpsc::Receiver<Notice>,
        cancel: CancellationToken,
    ) -> Result<(), FatalError> {
        info!(subscribers = self.subscribers.len(), "monitor started");
        loop {
            let notice = tokio::select! {
                item = notices.recv() => item,
                () = cancel.cancelled() => {
                    while let Ok(notice) = notices.try_recv() {
                        self.consume(notice).await?;
                    }
                    break;
                }
            };
            let Some(notice) = notice else { break };
            self.consume(notice).await?;
        }
        info!("monitor exiting");
        Ok(())
    }
}
