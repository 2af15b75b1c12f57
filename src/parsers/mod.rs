//! Payload parsing: prioritized first-accept dispatch over a set of format
//! parsers.
//!
//! Adapters hand raw payloads to the [`ParserChain`]; the first parser that
//! does not reject the payload produces the canonical reports. Rejections
//! are normal control flow, conversion failures of individual items are
//! logged and skipped, and a poison payload can never take down the chain.

mod atom;
mod csv;
mod draft;
mod geojson;
pub mod pattern;
mod social;
pub mod when;
mod quakeml;

pub use atom::AtomParser;
pub use csv::CsvParser;
pub use draft::Draft;
pub use geojson::{GeoJsonParser, P2PQuakeParser};
pub use quakeml::QuakeMlParser;
pub use social::SocialParser;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::Rejection;
use crate::types::{Coords, Report};

/// A raw unit of input from an adapter.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Fetched or streamed text (JSON, XML, CSV, plain bulletins).
    Text(String),
    /// A structured social-stream item.
    Social(SocialPost),
}

impl Payload {
    pub fn text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Social(_) => None,
        }
    }
}

/// One item from a social stream, normalized by the adapter.
#[derive(Debug, Clone)]
pub struct SocialPost {
    /// Post body.
    pub text: String,
    /// Posting handle.
    pub user: String,
    /// Stable post identifier (for links).
    pub id: String,
    /// Declared language, ISO 639-1, if the platform provides one.
    pub lang: Option<String>,
    /// Geotag, when the post carries one.
    pub coords: Option<Coords>,
    pub created_at: DateTime<Utc>,
    pub is_repost: bool,
    pub is_quote: bool,
    /// Whether the poster is a configured alerter account.
    pub from_alerter: bool,
    /// Link to the original post.
    pub link: Option<String>,
}

/// A format parser. `parse` either rejects (not my format) or yields the
/// reports it could convert, up to `limit`.
pub trait PayloadParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher tries first.
    fn priority(&self) -> i32 {
        0
    }

    fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection>;
}

/// Prioritized parser chain.
pub struct ParserChain {
    parsers: Vec<Arc<dyn PayloadParser>>,
}

impl ParserChain {
    pub fn new(mut parsers: Vec<Arc<dyn PayloadParser>>) -> Self {
        parsers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        Self { parsers }
    }

    /// Try each parser in priority order; first non-rejection wins.
    pub fn parse(&self, payload: &Payload, limit: usize) -> Result<Vec<Report>, Rejection> {
        for parser in &self.parsers {
            match parser.parse(payload, limit) {
                Ok(reports) => {
                    if parser.name() != "social" {
                        debug!(
                            parser = parser.name(),
                            count = reports.len(),
                            "payload identified"
                        );
                    }
                    return Ok(reports);
                }
                Err(rejection) => {
                    trace!(parser = parser.name(), reason = %rejection, "parser rejected payload");
                }
            }
        }
        Err(Rejection::new("no parser handles this payload"))
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub(&'static str, i32, bool);

    impl PayloadParser for Stub {
        fn name(&self) -> &'static str {
            self.0
        }
        fn priority(&self) -> i32 {
            self.1
        }
        fn parse(&self, _payload: &Payload, _limit: usize) -> Result<Vec<Report>, Rejection> {
            if self.2 {
                Ok(Vec::new())
            } else {
                Err(Rejection::new("nope"))
            }
        }
    }

    #[test]
    fn first_accepting_parser_wins_in_priority_order() {
        let chain = ParserChain::new(vec![
            Arc::new(Stub("low", 1, true)),
            Arc::new(Stub("high", 10, true)),
            Arc::new(Stub("mid", 5, false)),
        ]);
        // Highest-priority accepting parser must be consulted first; here
        // "high" accepts so the chain stops there.
        let payload = Payload::Text("x".into());
        assert!(chain.parse(&payload, 10).is_ok());
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn all_rejecting_is_a_rejection() {
        let chain = ParserChain::new(vec![Arc::new(Stub("a", 0, false))]);
        assert!(chain.parse(&Payload::Text("x".into()), 10).is_err());
    }
}
