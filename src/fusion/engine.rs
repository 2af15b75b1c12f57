//! The feed manager: gates incoming reports, fuses them into the bounded
//! event history, and emits notices.
//!
//! One instance owns the process-wide event history behind a single mutex;
//! the fusion worker is the only writer, readers snapshot under the lock.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FatalError;
use crate::fusion::event::Event;
use crate::geo::{RegionIndex, TravelTimes};
use crate::notice::Notice;
use crate::scoring::HeuristicStats;
use crate::storage::SeenDb;
use crate::types::{clip, Report};

/// Fusion gate tuning.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Reports below this magnitude are dropped.
    pub threshold_mag: f64,
    /// Reports with a location vaguer than this are dropped (km).
    pub precision_km: f64,
    /// Bound on live events.
    pub history_size: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            threshold_mag: 2.5,
            precision_km: 1000.0,
            history_size: 128,
        }
    }
}

/// Anti-swarm control: the ratio of the short-window report rate to the
/// long-window baseline rate, EMA-smoothed, multiplies the scores of
/// low-confidence reports. A sudden flood (bot swarm, viral joke) drives
/// the factor down; a quiet feed lets honest reports through untouched.
struct SwarmSlider {
    recent: VecDeque<Instant>,
    trend: VecDeque<Instant>,
    slider: f64,
    born: Instant,
}

const RECENT_TTL_SECS: u64 = 100;
const TREND_TTL_SECS: u64 = 1000;
const RECENT_CAP: usize = 256;
const TREND_CAP: usize = 2048;

impl SwarmSlider {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
            trend: VecDeque::new(),
            slider: 0.2,
            born: Instant::now(),
        }
    }

    fn observe(&mut self) -> f64 {
        let now = Instant::now();
        self.recent.push_back(now);
        self.trend.push_back(now);

        while self
            .recent
            .front()
            .is_some_and(|t| t.elapsed().as_secs() > RECENT_TTL_SECS)
        {
            self.recent.pop_front();
        }
        while self
            .trend
            .front()
            .is_some_and(|t| t.elapsed().as_secs() > TREND_TTL_SECS)
        {
            self.trend.pop_front();
        }
        while self.recent.len() > RECENT_CAP {
            self.recent.pop_front();
        }
        while self.trend.len() > TREND_CAP {
            self.trend.pop_front();
        }

        let mut factor = (self.recent.len() as f64 * TREND_TTL_SECS as f64)
            / (self.trend.len().max(1) as f64 * RECENT_TTL_SECS as f64);

        // Until the long window has turned over once its rate under-counts
        // the baseline; in that regime the factor may only dampen.
        if self.born.elapsed().as_secs() < TREND_TTL_SECS {
            factor = f64::min(1.0, 1.0 / factor.max(1e-9));
        }
        factor = clip(factor, 0.7, 1.5);

        self.slider = self.slider * 0.95 + factor * 0.05;
        self.slider
    }
}

/// Owns the event history and the report gates.
pub struct FeedManager {
    travel: Arc<TravelTimes>,
    regions: Arc<dyn RegionIndex>,
    seen: Arc<SeenDb>,
    stats: Arc<HeuristicStats>,
    config: FusionConfig,
    history: Mutex<VecDeque<Event>>,
    slider: Mutex<SwarmSlider>,
    started: DateTime<Utc>,
    next_id: AtomicU64,
}

impl FeedManager {
    pub fn new(
        travel: Arc<TravelTimes>,
        regions: Arc<dyn RegionIndex>,
        seen: Arc<SeenDb>,
        stats: Arc<HeuristicStats>,
        config: FusionConfig,
    ) -> Self {
        Self {
            travel,
            regions,
            seen,
            stats,
            config,
            history: Mutex::new(VecDeque::new()),
            slider: Mutex::new(SwarmSlider::new()),
            started: Utc::now(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Gate, fuse, and wrap one report. `None` means silently dropped.
    pub fn process(
        &self,
        mut report: Report,
        provider: &str,
    ) -> Result<Option<Notice>, FatalError> {
        let now = Utc::now();

        if report.time > now {
            debug!("dropping future-dated report");
            return Ok(None);
        }
        if report.posted() < now - Duration::hours(12) {
            debug!("dropping stale report");
            return Ok(None);
        }
        if report.posted() < self.started {
            debug!("dropping report predating this run");
            return Ok(None);
        }
        if report.mag.value() < self.config.threshold_mag {
            return Ok(None);
        }
        if report.coords.radius_km > self.config.precision_km {
            debug!(radius = report.coords.radius_km, "dropping imprecise report");
            return Ok(None);
        }
        match self.seen.admit(&report) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(FatalError::SeenStore(e)),
        }

        if report.confidence() < 0.4 {
            let slider = match self.slider.lock() {
                Ok(mut guard) => guard.observe(),
                Err(poisoned) => poisoned.into_inner().observe(),
            };
            report.score *= slider;
        }

        let event = self.fuse(report);

        if let Some(warners) = self.confirmation_of(&event) {
            info!(
                region = event.region,
                warners,
                confidence = event.confidence(),
                "crowd confirmation"
            );
        }

        debug!(
            provider,
            event = event.id,
            children = event.children.len(),
            "report fused"
        );

        Ok(Some(Notice::new(event, provider.to_string())))
    }

    fn fuse(&self, report: Report) -> Event {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let position = history
            .iter()
            .position(|event| event.matches(&report, &self.travel));

        let event = match position {
            Some(index) => {
                let mut event = history.remove(index).unwrap_or_else(|| {
                    // Position came from the same locked scan.
                    unreachable!("event index vanished under lock")
                });
                event.absorb(report, &self.travel);
                event.region = self.regions.region(&event.coords);
                event
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let region = self.regions.region(&report.coords);
                Event::seed(id, report, region, &self.travel)
            }
        };

        while history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(event.clone());
        event
    }

    fn confirmation_of(&self, event: &Event) -> Option<usize> {
        let warners = event.warners(&self.travel).len();
        if event.confidence() > 0.5 && warners > 0 {
            Some(warners)
        } else {
            None
        }
    }

    /// Learning pass: events that matured (went official, or aged out
    /// untimely with enough children) feed their crowdsourced children back
    /// into the heuristic counters; dead events leave the history.
    pub fn mature(&self) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut kept = VecDeque::with_capacity(history.len());
        while let Some(mut event) = history.pop_front() {
            let timely = crate::notice::timely_of(&event);
            let official = event.has_official();
            let expired = timely.is_none() && event.elapsed(30);

            if !official && !expired {
                kept.push_back(event);
                continue;
            }

            if event.children.len() >= 4 {
                let warner_keys: Vec<String> = event
                    .warners(&self.travel)
                    .iter()
                    .map(|w| w.canonical())
                    .collect();
                let witness_keys: Vec<String> = event
                    .witnesses()
                    .iter()
                    .map(|w| w.canonical())
                    .collect();

                for child in event.children.iter_mut() {
                    let key = child.canonical();
                    let credit = if warner_keys.contains(&key) {
                        1.0
                    } else if witness_keys.contains(&key) {
                        0.1
                    } else {
                        continue;
                    };
                    self.stats.learn(child, official, credit);
                }
                self.stats.mark_matured();
            }

            if expired {
                debug!(event = event.id, region = event.region, "event expired");
            } else {
                kept.push_back(event);
            }
        }
        *history = kept;
    }

    /// Copy of the live events, oldest first.
    pub fn history_snapshot(&self) -> Vec<Event> {
        match self.history.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Live events within `radius_km` of a point, newest first (the
    /// `quakes <place>` query surface).
    pub fn recent_near(&self, target: &crate::types::Coords, radius_km: f64) -> Vec<Event> {
        let mut near: Vec<Event> = self
            .history_snapshot()
            .into_iter()
            .filter(|event| event.coords.distance_km(target) <= radius_km)
            .collect();
        near.sort_by(|a, b| b.time.cmp(&a.time));
        near
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    /// Pretend the manager has been running since `when`. Replay and
    /// simulation harnesses need the freshness gate to accept reports whose
    /// feed timestamps predate process start.
    pub fn set_started(&mut self, when: DateTime<Utc>) {
        self.started = when;
    }

    /// Fusion worker loop: drain the report channel into the notice channel
    /// until cancelled or the channel closes. A seen-store failure aborts
    /// with the fatal error for the host to act on.
    pub async fn run(
        self: Arc<Self>,
        mut reports: mpsc::Receiver<(Report, String)>,
        notices: mpsc::Sender<Notice>,
        cancel: CancellationToken,
    ) -> Result<(), FatalError> {
        info!("fusion worker started");
        loop {
            let received = tokio::select! {
                item = reports.recv() => item,
                () = cancel.cancelled() => {
                    // Drain whatever is already queued, then stop.
                    while let Ok((report, provider)) = reports.try_recv() {
                        if let Some(notice) = self.process(report, &provider)? {
                            let _ = notices.send(notice).await;
                        }
                    }
                    break;
                }
            };

            let Some((report, provider)) = received else {
                break;
            };

            match self.process(report, &provider) {
                Ok(Some(notice)) => {
                    if notices.send(notice).await.is_err() {
                        warn!("notice channel closed, stopping fusion");
                        break;
                    }
                }
                Ok(None) => {}
                Err(fatal) => return Err(fatal),
            }
        }
        info!("fusion worker exiting");
        Ok(())
    }
}
