//! Social-stream adapter.
//!
//! Consumes a firehose of JSON posts over a WebSocket (`social+wss://…`)
//! and applies the stream-side hygiene the scorer must never see: per-poster
//! flood control, near-duplicate suppression, friend privileges, and
//! backpressure that sheds non-friend posts before the pipeline chokes.
//! Scoring itself happens in the parser chain.

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::websocket::RATE_LIMIT_COOLOFF;
use crate::adapters::AdapterContext;
use crate::parsers::{Payload, SocialPost};
use crate::runtime::worker;
use crate::types::Coords;

/// Recent posters remembered for flood control.
const POSTER_RING: usize = 64;
/// Recent texts remembered for duplicate suppression.
const TEXT_RING: usize = 16;
/// Text similarity above which two posts count as the same.
const SIMILARITY_CUTOFF: f64 = 0.9;
/// Reconnect delay after close/error.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Wire shape of one streamed post.
#[derive(Debug, Deserialize)]
struct WirePost {
    text: String,
    user: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    repost: bool,
    #[serde(default)]
    quote: bool,
}

pub struct SocialStreamAdapter {
    resource: String,
    friends: Vec<String>,
}

/// Crude similarity for near-duplicate posts: shared-prefix ratio after
/// normalization. Cheap, order-insensitive enough for retweet-ish spam.
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    (2.0 * shared as f64) / (a.len() + b.len()) as f64
}

impl SocialStreamAdapter {
    pub fn new(resource: String, friends: Vec<String>) -> Self {
        Self { resource, friends }
    }

    fn endpoint(&self) -> String {
        self.resource
            .replacen("social+wss://", "wss://", 1)
            .replacen("social+ws://", "ws://", 1)
            .replacen("social://", "wss://", 1)
    }

    fn decode(&self, text: &str) -> Option<SocialPost> {
        let wire: WirePost = serde_json::from_str(text).ok()?;

        let coords = match (wire.lat, wire.lon) {
            (Some(lat), Some(lon)) => Some(Coords::new(lat, lon, 0.0).with_radius(5.0)),
            _ => None,
        };
        let created_at = wire
            .created_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let from_alerter = self
            .friends
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&wire.user));

        let id = wire.id.unwrap_or_default();
        let link = if id.is_empty() {
            None
        } else {
            Some(format!("{}/{}/{}", self.endpoint(), wire.user, id))
        };

        Some(SocialPost {
            text: wire.text,
            user: wire.user,
            id,
            lang: wire.lang,
            coords,
            created_at,
            is_repost: wire.repost,
            is_quote: wire.quote,
            from_alerter,
            link,
        })
    }

    pub async fn run(self, ctx: AdapterContext, cancel: CancellationToken) {
        let provider = format!("social:{}", self.resource);
        let mut posters: VecDeque<String> = VecDeque::with_capacity(POSTER_RING);
        let mut texts: VecDeque<String> = VecDeque::with_capacity(TEXT_RING);
        let mut overwhelmed_until: Option<Instant> = None;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let connection = tokio::select! {
                conn = connect_async(self.endpoint()) => conn,
                () = cancel.cancelled() => break,
            };

            let (mut stream, _response) = match connection {
                Ok(ok) => ok,
                Err(WsError::Http(response))
                    if matches!(response.status().as_u16(), 420 | 429 | 406) =>
                {
                    warn!(resource = self.resource, "stream rate limited, cooling off");
                    overwhelmed_until = Some(Instant::now() + RATE_LIMIT_COOLOFF);
                    tokio::select! {
                        () = tokio::time::sleep(RATE_LIMIT_COOLOFF) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    debug!(resource = self.resource, error = %e, "stream connect failed");
                    tokio::select! {
                        () = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        () = cancel.cancelled() => break,
                    }
                }
            };

            info!(resource = self.resource, friends = self.friends.len(), "social stream connected");

            loop {
                let frame = tokio::select! {
                    frame = stream.next() => frame,
                    () = cancel.cancelled() => return,
                };

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Some(post) = self.decode(&text) else {
                            continue;
                        };
                        if !self.admit(&post, &mut posters, &mut texts, &ctx, &mut overwhelmed_until)
                        {
                            continue;
                        }

                        posters.push_back(post.user.clone());
                        while posters.len() > POSTER_RING {
                            posters.pop_front();
                        }
                        texts.push_back(post.text.clone());
                        while texts.len() > TEXT_RING {
                            texts.pop_front();
                        }

                        let payload = Payload::Social(post);
                        if let Ok(reports) = ctx.parser.parse(&payload, 1) {
                            for report in reports {
                                worker::offer(&ctx.reports, (report, provider.clone()), "fusion");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = stream.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "stream read error");
                        break;
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(RECONNECT_DELAY) => {}
                () = cancel.cancelled() => break,
            }
        }

        info!(resource = self.resource, "social adapter stopped");
    }

    /// Stream-side hygiene. Friends get slack, everyone else is shed first.
    fn admit(
        &self,
        post: &SocialPost,
        posters: &mut VecDeque<String>,
        texts: &mut VecDeque<String>,
        ctx: &AdapterContext,
        overwhelmed_until: &mut Option<Instant>,
    ) -> bool {
        let friend = post.from_alerter;

        if let Some(until) = overwhelmed_until {
            if Instant::now() < *until {
                if !friend {
                    return false;
                }
            } else {
                *overwhelmed_until = None;
            }
        }

        if post.text.starts_with("RT ") || post.is_repost {
            return false;
        }
        if !friend && post.text.chars().count() > 180 {
            return false;
        }
        if !friend && post.text.contains('@') {
            return false;
        }

        let repeats = posters.iter().filter(|p| **p == post.user).count();
        if repeats > if friend { 2 } else { 0 } {
            debug!(user = post.user, "poster flooding");
            return false;
        }

        let similar = texts
            .iter()
            .filter(|t| similarity(t, &post.text) >= SIMILARITY_CUTOFF)
            .count();
        if similar > if friend { 2 } else { 1 } {
            debug!("near-duplicate text suppressed");
            return false;
        }

        // Backpressure: when the fusion queue is mostly full, non-friend
        // posts are shed and the stream takes a breather.
        let capacity = ctx.reports.max_capacity();
        if ctx.reports.capacity() < capacity / 4 && !friend {
            if overwhelmed_until.is_none() {
                warn!("fusion queue saturated, suspending crowd intake");
                *overwhelmed_until = Some(Instant::now() + Duration::from_secs(60));
            }
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::ParserChain;
    use crate::runtime::Slowdown;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Semaphore};

    fn adapter() -> SocialStreamAdapter {
        SocialStreamAdapter::new(
            "social+wss://stream.example/feed".to_string(),
            vec!["quakebot_official".to_string()],
        )
    }

    fn context(queue: usize) -> AdapterContext {
        let (tx, rx) = mpsc::channel(queue);
        std::mem::forget(rx);
        AdapterContext {
            parser: Arc::new(ParserChain::new(Vec::new())),
            reports: tx,
            slowdown: Slowdown::new(),
            parse_gate: Arc::new(Semaphore::new(2)),
            friends: vec!["quakebot_official".to_string()],
        }
    }

    fn post(user: &str, text: &str) -> SocialPost {
        SocialPost {
            text: text.to_string(),
            user: user.to_string(),
            id: "1".to_string(),
            lang: Some("en".to_string()),
            coords: None,
            created_at: Utc::now(),
            is_repost: false,
            is_quote: false,
            from_alerter: user == "quakebot_official",
            link: None,
        }
    }

    #[test]
    fn endpoint_rewrites_scheme() {
        assert_eq!(adapter().endpoint(), "wss://stream.example/feed");
    }

    #[test]
    fn decode_wire_post() {
        let a = adapter();
        let json = r#"{"text": "EARTHQUAKE!!", "user": "witness", "id": "42",
                       "lang": "en", "lat": 37.98, "lon": 23.73}"#;
        let post = a.decode(json).expect("decodes");
        assert_eq!(post.user, "witness");
        assert!(post.coords.is_some());
        assert!(!post.from_alerter);

        let friend = a
            .decode(r#"{"text": "M5 quake", "user": "quakebot_official"}"#)
            .expect("decodes");
        assert!(friend.from_alerter);
    }

    #[test]
    fn flood_control_limits_posters() {
        let a = adapter();
        let ctx = context(64);
        let mut posters = VecDeque::new();
        let mut texts = VecDeque::new();
        let mut overwhelmed = None;

        assert!(a.admit(&post("spammer", "quake one"), &mut posters, &mut texts, &ctx, &mut overwhelmed));
        posters.push_back("spammer".to_string());
        // Second post from the same non-friend poster is shed.
        assert!(!a.admit(&post("spammer", "quake two"), &mut posters, &mut texts, &ctx, &mut overwhelmed));
    }

    #[test]
    fn near_duplicates_suppressed() {
        let a = adapter();
        let ctx = context(64);
        let mut posters = VecDeque::new();
        let mut texts = VecDeque::new();
        let mut overwhelmed = None;

        texts.push_back("big earthquake in athens right now".to_string());
        texts.push_back("big earthquake in athens right nooo".to_string());

        // A third nearly-identical text crosses the similarity allowance.
        assert!(!a.admit(
            &post("witness3", "big earthquake in athens right no"),
            &mut posters,
            &mut texts,
            &ctx,
            &mut overwhelmed
        ));
    }

    #[test]
    fn reposts_and_replies_shed() {
        let a = adapter();
        let ctx = context(64);
        let mut posters = VecDeque::new();
        let mut texts = VecDeque::new();
        let mut overwhelmed = None;

        assert!(!a.admit(&post("u1", "RT someone: earthquake"), &mut posters, &mut texts, &ctx, &mut overwhelmed));
        assert!(!a.admit(&post("u2", "@friend earthquake?"), &mut posters, &mut texts, &ctx, &mut overwhelmed));

        let long = "x".repeat(200);
        assert!(!a.admit(&post("u3", &long), &mut posters, &mut texts, &ctx, &mut overwhelmed));
        // Friends are exempt from the length rule.
        assert!(a.admit(&post("quakebot_official", &long), &mut posters, &mut texts, &ctx, &mut overwhelmed));
    }

    #[test]
    fn similarity_measure() {
        assert!(similarity("earthquake now", "earthquake now") > 0.99);
        assert!(similarity("earthquake now", "earthquake nov") > 0.8);
        assert!(similarity("earthquake", "lovely weather") < 0.3);
    }
}
