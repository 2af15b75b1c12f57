//! POST long-poll push adapter.
//!
//! Some services deliver batches in response to a held-open POST. The
//! adapter posts, waits up to ten minutes for the response, and treats
//! suspiciously-fast or failed responses as a signal to back off
//! exponentially.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::AdapterContext;
use crate::parsers::Payload;
use crate::runtime::worker;

/// Long-poll response window.
const POLL_TIMEOUT: Duration = Duration::from_secs(600);
/// A response faster than this is the server brushing us off.
const SUSPICIOUS_RESPONSE_SECS: u64 = 10;
/// Items parsed per response.
const RESPONSE_LIMIT: usize = 12;

pub struct PostAdapter {
    resource: String,
}

impl PostAdapter {
    pub fn new(resource: String) -> Self {
        Self { resource }
    }

    fn url(&self) -> String {
        self.resource.replacen("post://", "https://", 1)
    }

    pub async fn run(self, ctx: AdapterContext, cancel: CancellationToken) {
        let client = match reqwest::Client::builder()
            .timeout(POLL_TIMEOUT)
            .user_agent(concat!("tremorwire/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "HTTP client construction failed");
                return;
            }
        };

        let provider = format!("post:{}", self.resource);
        let mut backoff: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let response = tokio::select! {
                resp = client.post(self.url()).send() => resp,
                () = cancel.cancelled() => break,
            };

            let body = match response {
                Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
                Ok(resp) => {
                    debug!(status = %resp.status(), "push endpoint refused");
                    None
                }
                Err(e) => {
                    debug!(error = %e, "push request failed");
                    None
                }
            };

            let too_fast = started.elapsed().as_secs() < SUSPICIOUS_RESPONSE_SECS;

            match body {
                Some(text) if !too_fast && !text.is_empty() => {
                    backoff = 0;
                    match ctx.parser.parse(&Payload::Text(text), RESPONSE_LIMIT) {
                        Ok(reports) => {
                            for report in reports {
                                worker::offer_patient(
                                    &ctx.reports,
                                    (report, provider.clone()),
                                    Duration::from_secs(5),
                                    "fusion",
                                )
                                .await;
                            }
                        }
                        Err(rejection) => debug!(reason = %rejection, "push payload unusable"),
                    }
                }
                _ => {
                    backoff = (backoff + 1) * 2;
                    let sleep = Duration::from_secs(backoff.min(600));
                    debug!(seconds = sleep.as_secs(), "push backoff");
                    tokio::select! {
                        () = tokio::time::sleep(sleep) => {}
                        () = cancel.cancelled() => break,
                    }
                }
            }
        }

        info!(resource = self.resource, "push adapter stopped");
    }
}
