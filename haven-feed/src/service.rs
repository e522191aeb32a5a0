//! The feed front door: a multiplexer feeding one processing task that owns
//! the aggregator and publishes throttled snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::aggregator::{AggregatorLimits, EventAggregator, FeedSnapshot, Ingest};
use crate::error::FeedError;
use crate::multiplexer::{
    ConnectionStatus, InboundMessage, SubscriptionMultiplexer, SubscriptionSettings,
};
use crate::throttle::Throttle;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub subscription: SubscriptionSettings,
    pub limits: AggregatorLimits,
    /// Minimum spacing between published updates.
    pub throttle: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            subscription: SubscriptionSettings::default(),
            limits: AggregatorLimits::default(),
            throttle: Duration::from_millis(300),
        }
    }
}

/// One published change batch.
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    /// Notes added since the previous update.
    pub new_records: usize,
    /// Media references added since the previous update.
    pub new_media: usize,
    pub snapshot: Arc<FeedSnapshot>,
}

pub struct FeedService {
    multiplexer: SubscriptionMultiplexer,
    processor: JoinHandle<()>,
}

impl FeedService {
    /// Start the processing task. Updates arrive on the returned receiver;
    /// dropping it stops processing.
    pub fn spawn(options: FeedOptions) -> (Self, mpsc::UnboundedReceiver<FeedUpdate>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        let processor = Processor {
            aggregator: EventAggregator::new(options.limits),
            throttle: Throttle::new(options.throttle),
            generation: generation.clone(),
            updates: updates_tx,
            new_records: 0,
            new_media: 0,
        };
        let service = Self {
            multiplexer: SubscriptionMultiplexer::new(options.subscription, generation, inbound_tx),
            processor: tokio::spawn(processor.run(inbound_rx)),
        };
        (service, updates_rx)
    }

    /// Subscribe to each endpoint not already subscribed.
    pub fn fetch<I, S>(&mut self, endpoints: I) -> Result<usize, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.multiplexer.fetch(endpoints)
    }

    /// Drop every subscription. The aggregate is kept; messages read before
    /// the reset are discarded.
    pub fn reset(&mut self) {
        self.multiplexer.reset();
    }

    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.multiplexer.statuses()
    }

    pub fn shutdown(mut self) {
        self.multiplexer.reset();
        self.processor.abort();
    }
}

impl Drop for FeedService {
    fn drop(&mut self) {
        self.processor.abort();
    }
}

// ---------------------------------------------------------------------------
// Processing task
// ---------------------------------------------------------------------------

struct Processor {
    aggregator: EventAggregator,
    throttle: Throttle,
    generation: Arc<AtomicU64>,
    updates: mpsc::UnboundedSender<FeedUpdate>,
    new_records: usize,
    new_media: usize,
}

impl Processor {
    async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        loop {
            let deadline = self.throttle.deadline();
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else { break };
                    if self.handle(message).is_err() {
                        return;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.throttle.on_tick(Instant::now()) && self.publish().is_err() {
                        return;
                    }
                }
            }
        }
        // Senders gone: flush whatever is still owed.
        if self.throttle.deadline().is_some() {
            let _ = self.publish();
        }
    }

    fn handle(&mut self, message: InboundMessage) -> Result<(), Closed> {
        if message.generation != self.generation.load(Ordering::SeqCst) {
            tracing::trace!(endpoint = %message.endpoint, "dropping stale message");
            return Ok(());
        }
        let outcome = self.aggregator.on_message(&message.text);
        if let Ingest::Added { note, media } = outcome {
            self.new_records += usize::from(note);
            self.new_media += media;
        }
        if outcome.changed() && self.throttle.on_change(Instant::now()) {
            self.publish()?;
        }
        Ok(())
    }

    fn publish(&mut self) -> Result<(), Closed> {
        let update = FeedUpdate {
            new_records: std::mem::take(&mut self.new_records),
            new_media: std::mem::take(&mut self.new_media),
            snapshot: Arc::new(self.aggregator.snapshot()),
        };
        tracing::debug!(
            new_records = update.new_records,
            new_media = update.new_media,
            total = update.snapshot.records.len(),
            "feed updated"
        );
        self.updates.send(update).map_err(|_| Closed)
    }
}

/// The update receiver was dropped.
struct Closed;
