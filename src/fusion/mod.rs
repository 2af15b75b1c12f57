//! Duplicate-event fusion: the event model and the feed manager that owns
//! the bounded history.

mod engine;
mod event;

pub use engine::{FeedManager, FusionConfig};
pub use event::{Event, MAX_REPORTS};
