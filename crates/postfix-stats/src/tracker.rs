// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-message state correlating lifecycle events that belong to the same queue id.

use fnv::FnvBuildHasher;
use hashbrown::{HashMap, HashSet};
use tracing::trace;

use crate::classifier::{LifecycleEvent, QueueId};
use crate::counter::{Counter, CounterSet};

/// Transient per-queue-id state.
///
/// Entries are created by `Received` and `QueueActive` and consumed by the first
/// `QueueActive` (size credit) and `Removed` (recorded size). Nothing expires by time; memory
/// stays bounded because Postfix logs a removal for every message that leaves the queue.
#[derive(Debug, Default)]
pub struct LifecycleTracker {
    awaiting_size_credit: HashSet<QueueId, FnvBuildHasher>,
    recorded_size: HashMap<QueueId, u64, FnvBuildHasher>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into `counters`, updating the per-id state.
    pub fn apply(&mut self, event: LifecycleEvent, counters: &mut CounterSet) {
        match event {
            LifecycleEvent::Received(id) => {
                counters.increment(Counter::Received);
                self.awaiting_size_credit.insert(id);
            }
            LifecycleEvent::QueueActive(id, size) => {
                // Only the first activation after a receipt credits bytes-received.
                if self.awaiting_size_credit.remove(&id) {
                    counters.add(Counter::BytesReceived, size);
                }
                self.recorded_size.insert(id, size);
            }
            LifecycleEvent::Removed(id) => {
                // The awaiting flag is left alone: an id that was received but never
                // activated keeps it until the next activation for that id.
                if self.recorded_size.remove(&id).is_none() {
                    trace!("Removed queue id {} without a recorded size", id);
                }
            }
            LifecycleEvent::Forwarded => counters.increment(Counter::Forwarded),
            LifecycleEvent::Delivered(id) => {
                let size = self.recorded_size.get(&id).copied().unwrap_or(0);
                counters.add(Counter::BytesDelivered, size);
                counters.increment(Counter::Delivered);
            }
            LifecycleEvent::Bounced => counters.increment(Counter::Bounced),
            LifecycleEvent::Deferred => counters.increment(Counter::Deferred),
            LifecycleEvent::Rejected => counters.increment(Counter::Rejected),
            LifecycleEvent::Discarded => counters.increment(Counter::Discarded),
            LifecycleEvent::Held => counters.increment(Counter::Held),
        }
    }

    pub fn clear(&mut self) {
        self.awaiting_size_credit.clear();
        self.recorded_size.clear();
    }

    /// Number of ids received but not yet activated.
    pub fn awaiting_credit_len(&self) -> usize {
        self.awaiting_size_credit.len()
    }

    /// Number of ids with a recorded size (activated, not yet removed).
    pub fn recorded_size_len(&self) -> usize {
        self.recorded_size.len()
    }

    pub fn is_empty(&self) -> bool {
        self.awaiting_size_credit.is_empty() && self.recorded_size.is_empty()
    }
}
