//! Deduplicating record store with lazily ordered, bounded collections.
//!
//! Records are appended as they arrive and only re-sorted newest-first on
//! every `sort_stride`-th note or when new media shows up; truncation to the
//! cap happens at those same points.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use haven_core::types::{MediaReference, RecordKind};
use haven_core::Record;

use crate::media::extract_media;
use crate::message::{parse_inbound, Inbound};

/// Sizes that bound the aggregator's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorLimits {
    pub record_cap: usize,
    pub media_cap: usize,
    pub sort_stride: usize,
    pub seen_capacity: usize,
}

impl Default for AggregatorLimits {
    fn default() -> Self {
        Self {
            record_cap: 1000,
            media_cap: 1000,
            sort_stride: 20,
            seen_capacity: 50_000,
        }
    }
}

/// What one inbound message did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Not an event, or not decodable.
    Ignored,
    Duplicate,
    Added { note: bool, media: usize },
}

impl Ingest {
    pub fn changed(self) -> bool {
        matches!(self, Ingest::Added { note, media } if note || media > 0)
    }
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedSnapshot {
    /// Notes, newest first as of the last re-sort.
    pub records: Vec<Record>,
    /// Media with duplicate URLs removed, newest first.
    pub media: Vec<MediaReference>,
}

#[derive(Debug)]
pub struct EventAggregator {
    limits: AggregatorLimits,
    seen: SeenIds,
    records: Vec<Record>,
    media: Vec<MediaReference>,
}

impl EventAggregator {
    pub fn new(limits: AggregatorLimits) -> Self {
        Self {
            seen: SeenIds::new(limits.seen_capacity),
            limits,
            records: Vec::new(),
            media: Vec::new(),
        }
    }

    /// Decode and ingest one raw relay message. Malformed input is dropped.
    pub fn on_message(&mut self, raw: &str) -> Ingest {
        match parse_inbound(raw) {
            Ok(Inbound::Event { record, .. }) => self.ingest(record),
            Ok(Inbound::Ignored) => Ingest::Ignored,
            Err(err) => {
                tracing::debug!(error = %err, "dropping relay message");
                Ingest::Ignored
            }
        }
    }

    pub fn ingest(&mut self, record: Record) -> Ingest {
        if self.is_known(&record.id) {
            return Ingest::Duplicate;
        }
        self.seen.insert(&record.id);

        let found = extract_media(&record);
        let media = found.len();
        self.media.extend(found);

        let note = record.kind == RecordKind::NOTE;
        if note {
            self.records.push(record);
        }

        let stride = self.limits.sort_stride.max(1);
        if (note && self.records.len() % stride == 0) || media > 0 {
            self.reorder();
        }
        Ingest::Added { note, media }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn media(&self) -> &[MediaReference] {
        &self.media
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let mut urls = HashSet::new();
        let mut media: Vec<MediaReference> = self
            .media
            .iter()
            .filter(|item| urls.insert(item.url.as_str()))
            .cloned()
            .collect();
        media.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        FeedSnapshot {
            records: self.records.clone(),
            media,
        }
    }

    /// A kept record stays a duplicate even after its id left the seen set.
    fn is_known(&self, id: &str) -> bool {
        self.seen.contains(id)
            || (self.seen.has_evicted() && self.records.iter().any(|kept| kept.id == id))
    }

    fn reorder(&mut self) {
        self.records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.records.truncate(self.limits.record_cap);
        self.media.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        self.media.truncate(self.limits.media_cap);
    }
}

// ---------------------------------------------------------------------------
// Seen ids
// ---------------------------------------------------------------------------

/// Insertion-ordered id set that forgets the oldest ids past `capacity`.
#[derive(Debug)]
struct SeenIds {
    capacity: usize,
    ids: HashSet<String>,
    order: VecDeque<String>,
    evicted: bool,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: HashSet::new(),
            order: VecDeque::new(),
            evicted: false,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn has_evicted(&self) -> bool {
        self.evicted
    }

    /// `true` when `id` was not already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
                self.evicted = true;
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}
