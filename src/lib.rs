//! Tremorwire: real-time earthquake alert correlation and broadcast.
//!
//! ## Architecture
//!
//! - **Adapters**: one task per source (HTTP/FDSN polling, WebSocket,
//!   POST push, social streams) emitting canonical reports
//! - **Fusion**: duplicate reports merge into bounded events with
//!   confidence-weighted attributes
//! - **Scoring**: crowdsourced text scored by a learnable heuristic table
//! - **Monitor**: notices classified, matched against subscriptions, and
//!   dispatched through sink transports

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod fusion;
pub mod geo;
pub mod monitor;
pub mod notice;
pub mod parsers;
pub mod runtime;
pub mod scoring;
pub mod sinks;
pub mod storage;
pub mod types;

// Re-export the data model
pub use types::{Coords, Intensity, Magnitude, Report, Severity, Status, Water};

// Re-export the pipeline stages
pub use fusion::{Event, FeedManager};
pub use notice::{Notice, Reason, Timely};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{AdapterContext, AdapterSet};
use crate::config::{Config, SinkSpec};
use crate::domain::{DomainContext, ThresholdBook};
use crate::error::FatalError;
use crate::fusion::FusionConfig;
use crate::geo::{BuiltinRegions, NoDemographics, TravelTimes};
use crate::monitor::{Monitor, Subscriber};
use crate::parsers::{
    AtomParser, CsvParser, GeoJsonParser, P2PQuakeParser, ParserChain, QuakeMlParser, SocialParser,
};
use crate::runtime::Slowdown;
use crate::scoring::{HeuristicStats, TermCounter, UserScores};
use crate::sinks::{FileSink, LogSink, Sink};
use crate::storage::{HeuristicsDb, SeenDb, ThresholdDb};

/// Cadence of the learning/maturation pass.
const LEARNING_TICK: Duration = Duration::from_secs(300);

/// The assembled system. All shared services are constructed here and
/// passed down by reference; nothing module-global.
pub struct Pipeline {
    pub manager: Arc<FeedManager>,
    pub monitor: Arc<Monitor>,
    pub adapters: Arc<AdapterSet>,
    pub slowdown: Arc<Slowdown>,
    pub stats: Arc<HeuristicStats>,
    pub scores: Arc<UserScores>,
    pub terms: Arc<TermCounter>,
    pub thresholds: Arc<ThresholdBook>,
    heuristics_db: Arc<HeuristicsDb>,
    reports_tx: mpsc::Sender<(Report, String)>,
    reports_rx: Option<mpsc::Receiver<(Report, String)>>,
    notices_tx: mpsc::Sender<Notice>,
    notices_rx: Option<mpsc::Receiver<Notice>>,
    sources: Vec<String>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Wire every service from configuration. Opens the persistent stores
    /// under `config.data_dir`.
    pub fn build(config: &Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let travel = Arc::new(TravelTimes::default());
        let regions = Arc::new(BuiltinRegions);
        let slowdown = Slowdown::new();

        let seen = Arc::new(SeenDb::open(store_path(&config.data_dir, "seen.db"))?);
        let threshold_db = Arc::new(ThresholdDb::open(store_path(
            &config.data_dir,
            "thresholds.db",
        ))?);
        let heuristics_db = Arc::new(HeuristicsDb::open(store_path(
            &config.data_dir,
            "heuristics.db",
        ))?);

        let stats = Arc::new(HeuristicStats::from_db(&heuristics_db));
        let scores = Arc::new(UserScores::default());
        let terms = Arc::new(TermCounter::default());
        let thresholds = Arc::new(ThresholdBook::new(Some(threshold_db.clone())));

        let parser = Arc::new(ParserChain::new(vec![
            Arc::new(SocialParser::new(
                config.friends.clone(),
                scores.clone(),
                terms.clone(),
                regions.clone(),
                regions.clone(),
            )),
            Arc::new(P2PQuakeParser),
            Arc::new(GeoJsonParser),
            Arc::new(AtomParser::new(regions.clone(), regions.clone())),
            Arc::new(QuakeMlParser::new()),
            Arc::new(CsvParser),
        ]));

        let manager = Arc::new(FeedManager::new(
            travel.clone(),
            regions.clone(),
            seen,
            stats.clone(),
            FusionConfig {
                threshold_mag: config.fusion.threshold_mag,
                precision_km: config.fusion.precision_km,
                history_size: config.fusion.history_size,
            },
        ));

        let (reports_tx, reports_rx) = mpsc::channel(config.queue_size);
        let (notices_tx, notices_rx) = mpsc::channel(config.queue_size);

        let adapters = Arc::new(AdapterSet::new(AdapterContext {
            parser,
            reports: reports_tx.clone(),
            slowdown: slowdown.clone(),
            parse_gate: Arc::new(Semaphore::new(2)),
            friends: config.friends.clone(),
        }));

        let ctx = DomainContext {
            travel,
            demographics: Arc::new(NoDemographics),
            thresholds: thresholds.clone(),
        };

        let mut subscribers = Vec::new();
        for spec in &config.subscribers {
            let sink: Arc<dyn Sink> = match &spec.sink {
                SinkSpec::Log { style } => Arc::new(LogSink::new(*style)),
                SinkSpec::File { path } => Arc::new(FileSink::new(path.clone())),
            };
            let domains = spec
                .domains
                .iter()
                .map(|d| Arc::new(d.build(Some(&threshold_db))))
                .collect();
            subscribers.push(Subscriber {
                sink,
                domains,
                languages: spec.languages.clone(),
            });
        }

        let monitor = Arc::new(Monitor::new(subscribers, ctx, regions, slowdown.clone()));

        Ok(Self {
            manager,
            monitor,
            adapters,
            slowdown,
            stats,
            scores,
            terms,
            thresholds,
            heuristics_db,
            reports_tx,
            reports_rx: Some(reports_rx),
            notices_tx,
            notices_rx: Some(notices_rx),
            sources: config.sources.clone(),
            cancel: CancellationToken::new(),
        })
    }

    /// Inject a report as if an adapter produced it (simulation, tests).
    pub async fn inject(&self, report: Report, provider: &str) {
        let _ = self.reports_tx.send((report, provider.to_string())).await;
    }

    /// A cloned report sender, for injection after the pipeline is moved
    /// into `run()`.
    pub fn reports_sender_for_simulation(&self) -> mpsc::Sender<(Report, String)> {
        self.reports_tx.clone()
    }

    /// Request an orderly shutdown.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run everything until a fatal condition or shutdown.
    ///
    /// The fatal path is returned, not exited: the host maps
    /// [`FatalError`] to a software-error exit code and restarts.
    pub async fn run(mut self) -> Result<(), FatalError> {
        let cancel = self.cancel.clone();

        for source in &self.sources {
            if let Err(e) = self.adapters.add(source).await {
                warn!(source, error = %e, "source skipped");
            }
        }

        let supervisor =
            tokio::spawn(self.adapters.clone().run_supervisor(cancel.child_token()));

        let reports_rx = self
            .reports_rx
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        let fusion = tokio::spawn(self.manager.clone().run(
            reports_rx,
            self.notices_tx.clone(),
            cancel.child_token(),
        ));

        // Learning pass + counter persistence on a slow tick.
        let learner = {
            let manager = self.manager.clone();
            let stats = self.stats.clone();
            let heuristics_db = self.heuristics_db.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(LEARNING_TICK) => {
                            manager.mature();
                            if let Err(e) = stats.sync(&heuristics_db) {
                                warn!(error = %e, "heuristics sync failed");
                            }
                        }
                        () = cancel.cancelled() => break,
                    }
                }
            })
        };

        let notices_rx = self
            .notices_rx
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        let monitor_result = self
            .monitor
            .clone()
            .run(notices_rx, cancel.child_token())
            .await;

        // Monitor exit (fatal or shutdown) brings the rest down.
        cancel.cancel();
        let _ = supervisor.await;
        learner.abort();
        match fusion.await {
            Ok(Err(fatal)) => return Err(fatal),
            Ok(Ok(())) | Err(_) => {}
        }

        info!("pipeline stopped");
        monitor_result
    }
}

fn store_path(dir: &Path, file: &str) -> std::path::PathBuf {
    dir.join(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipeline_builds_from_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            ..Config::default()
        };

        let pipeline = Pipeline::build(&config).expect("builds");
        assert_eq!(pipeline.adapters.len().await, 0);
        assert_eq!(pipeline.manager.history_snapshot().len(), 0);
    }
}
