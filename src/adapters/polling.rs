//! Adaptive-period polling over HTTP, including FDSN event services.
//!
//! The poll period chases one third of the shortest observed
//! publish-to-update interval, clamped to [50 s, 500 s] and multiplied by
//! the global slowdown factor. Unchanged payloads (byte-equal to the last
//! fetch) are skipped. A process-wide semaphore keeps at most two HTTP
//! payloads parsing at once.

use chrono::Utc;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::AdapterContext;
use crate::parsers::Payload;
use crate::runtime::worker;
use crate::types::{clip, Report};

/// Fastest allowed poll (seconds).
pub const PERIOD_MIN: f64 = 50.0;
/// Slowest allowed poll (seconds).
pub const PERIOD_MAX: f64 = 500.0;
/// Cool-off period after a failed fetch (seconds).
const PERIOD_COOLOFF: f64 = 300.0;
/// Per-fetch HTTP timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(32);
/// Baseline items parsed per cycle.
const LIMIT_DEFAULT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerKind {
    Http,
    Fdsn,
}

pub struct Poller {
    resource: String,
    kind: PollerKind,
    period: f64,
    limit: usize,
    cache: Option<Vec<u8>>,
}

impl Poller {
    pub fn new(resource: String, kind: PollerKind) -> Self {
        let base = match kind {
            PollerKind::Http => 100.0,
            PollerKind::Fdsn => 90.0,
        };
        // Jitter so a fleet of pollers does not thunder in step.
        let period = rand::thread_rng().gen_range(base * 0.9..=base * 1.1);

        Self {
            resource,
            kind,
            period: clip(period, PERIOD_MIN, PERIOD_MAX),
            limit: LIMIT_DEFAULT,
            cache: None,
        }
    }

    /// The URL actually fetched. FDSN resources expand to an event query
    /// over the last twelve hours.
    fn url(&self) -> String {
        match self.kind {
            PollerKind::Http => self.resource.clone(),
            PollerKind::Fdsn => {
                let start = (Utc::now() - chrono::Duration::hours(12))
                    .format("%Y-%m-%dT%H:%M:%S");
                let host = self.resource.trim_start_matches("fdsn://");
                format!(
                    "https://{host}/fdsnws/event/1/query?starttime={start}&minmagnitude=3.0&format=xml"
                )
            }
        }
    }

    /// Pull the period toward one third of the tightest publish interval
    /// seen in this batch; fast targets converge quickly, slow ones barely
    /// drift.
    fn adapt(&mut self, reports: &[Report]) {
        let intervals: Vec<f64> = reports
            .iter()
            .filter(|r| r.update > r.time)
            .map(|r| (r.update - r.time).num_seconds() as f64 / 3.0)
            .collect();
        let Some(shortest) = intervals.iter().copied().reduce(f64::min) else {
            return;
        };

        let target = clip(shortest, PERIOD_MIN, PERIOD_MAX);
        let weight = if target < self.period { 0.7 } else { 0.05 };
        self.period = clip(
            self.period * (1.0 - weight) + target * weight,
            PERIOD_MIN,
            PERIOD_MAX,
        );
    }

    fn nudge_toward(&mut self, target: f64) {
        self.period = clip(
            self.period * 0.7 + target * 0.3,
            PERIOD_MIN,
            PERIOD_MAX,
        );
    }

    async fn fetch(&self, client: &reqwest::Client) -> Result<Vec<u8>, crate::error::AdapterError> {
        let response = client.get(self.url()).send().await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(crate::error::AdapterError::RateLimited { code: 429 });
        }
        if !status.is_success() {
            return Err(crate::error::AdapterError::Fetch(format!(
                "status {status}"
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn run(mut self, ctx: AdapterContext, cancel: CancellationToken) {
        let client = match reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(concat!("tremorwire/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "HTTP client construction failed");
                return;
            }
        };

        let provider = match self.kind {
            PollerKind::Http => format!("http:{}", self.resource),
            PollerKind::Fdsn => format!("fdsn:{}", self.resource),
        };

        loop {
            let sleep = Duration::from_secs_f64(self.period * ctx.slowdown.factor());
            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                () = cancel.cancelled() => break,
            }

            // When the whole pipeline is drowning, plain HTTP feeds are the
            // first to stand down; FDSN catalogs are the backbone.
            if self.kind == PollerKind::Http && ctx.slowdown.factor() > 1.5 {
                debug!(resource = self.resource, "skipping cycle under slowdown");
                continue;
            }

            let cycle_started = Instant::now();

            let bytes = match self.fetch(&client).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(resource = self.resource, error = %e, "fetch failed, cooling off");
                    self.period = PERIOD_COOLOFF;
                    continue;
                }
            };

            if self.cache.as_deref() == Some(bytes.as_slice()) || bytes.is_empty() {
                self.nudge_toward(self.period * 0.99);
                continue;
            }
            self.cache = Some(bytes.clone());

            let limit = ((self.limit as f64 / ctx.slowdown.factor()) as usize).max(1);
            let payload = Payload::Text(String::from_utf8_lossy(&bytes).into_owned());

            let reports = {
                // Gate concurrent parsing; payloads can be megabytes.
                let _permit = ctx.parse_gate.acquire().await;
                match ctx.parser.parse(&payload, limit) {
                    Ok(reports) => reports,
                    Err(rejection) => {
                        debug!(resource = self.resource, reason = %rejection, "payload unusable");
                        self.period = PERIOD_COOLOFF;
                        continue;
                    }
                }
            };

            info!(
                resource = self.resource,
                count = reports.len(),
                period = self.period as u64,
                "poll cycle parsed"
            );

            for report in &reports {
                worker::offer_patient(
                    &ctx.reports,
                    (report.clone(), provider.clone()),
                    Duration::from_secs(5),
                    "fusion",
                )
                .await;
            }

            let elapsed = cycle_started.elapsed().as_secs_f64();
            if elapsed < self.period * 0.25 {
                self.adapt(&reports);
            } else {
                // The cycle ate too much of the period; do less next time.
                self.limit = (self.limit / 2).clamp(3, 48);
                debug!(resource = self.resource, limit = self.limit, "cycle too slow");
            }
            self.nudge_toward(self.period + elapsed * ctx.slowdown.factor());
        }

        info!(resource = self.resource, "poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coords, Magnitude};
    use chrono::Duration as ChronoDuration;

    fn poller() -> Poller {
        Poller::new("http://example.org/feed".to_string(), PollerKind::Http)
    }

    fn report_with_interval(seconds: i64) -> Report {
        let time = Utc::now() - ChronoDuration::minutes(10);
        let mut r = Report::new(
            Coords::new(35.0, 139.0, -10.0),
            time,
            Magnitude::new(5.0, None),
        );
        r.update = time + ChronoDuration::seconds(seconds);
        r
    }

    #[test]
    fn initial_period_is_jittered_within_bounds() {
        for _ in 0..20 {
            let p = poller();
            assert!((PERIOD_MIN..=PERIOD_MAX).contains(&p.period));
        }
    }

    #[test]
    fn fast_feed_pulls_period_down() {
        let mut p = poller();
        p.period = 400.0;
        p.adapt(&[report_with_interval(180)]);
        // Target 60 s, weight 0.7: period drops sharply.
        assert!(p.period < 200.0, "period {}", p.period);
        assert!(p.period >= PERIOD_MIN);
    }

    #[test]
    fn slow_feed_drifts_up_gently() {
        let mut p = poller();
        p.period = 60.0;
        let before = p.period;
        p.adapt(&[report_with_interval(3000)]);
        assert!(p.period > before);
        assert!(p.period < before + 30.0, "gentle drift only, got {}", p.period);
        assert!(p.period <= PERIOD_MAX);
    }

    #[test]
    fn period_always_clamped() {
        let mut p = poller();
        p.period = 60.0;
        for _ in 0..100 {
            p.adapt(&[report_with_interval(100_000)]);
            assert!((PERIOD_MIN..=PERIOD_MAX).contains(&p.period));
        }
    }

    #[test]
    fn fdsn_url_expansion() {
        let p = Poller::new("fdsn://service.iris.edu".to_string(), PollerKind::Fdsn);
        let url = p.url();
        assert!(url.starts_with("https://service.iris.edu/fdsnws/event/1/query?"));
        assert!(url.contains("minmagnitude=3.0"));
    }
}
