//! Live record feed from a set of relay endpoints.
//!
//! [`FeedService`] subscribes to every endpoint over WebSocket, funnels the
//! raw messages into one processing task, deduplicates and orders them in an
//! [`EventAggregator`], and publishes throttled [`FeedUpdate`]s.

pub mod aggregator;
mod error;
pub mod media;
pub mod message;
pub mod multiplexer;
mod service;
pub mod throttle;

pub use aggregator::{AggregatorLimits, EventAggregator, FeedSnapshot, Ingest};
pub use error::FeedError;
pub use multiplexer::{ConnectionStatus, SubscriptionSettings};
pub use service::{FeedOptions, FeedService, FeedUpdate};
