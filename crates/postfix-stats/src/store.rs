// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter storage in two flavours.
//!
//! [`CounterStore`] is a plain value for a single finite pass over a log: it is mutated through
//! `&mut self` and never locks. [`SharedCounterStore`] wraps the same state behind one mutex so
//! a log consumer and any number of query connections can use it concurrently. The mode is
//! picked by choosing the type, once, when the pipeline is built.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::classifier::LifecycleEvent;
use crate::counter::{Counter, CounterSet};
use crate::tracker::LifecycleTracker;

/// Destination for classified lifecycle events.
pub trait CounterSink {
    fn record(&mut self, event: LifecycleEvent);
}

/// Counters plus the transient per-id state that feeds them.
#[derive(Debug, Default)]
pub struct CounterStore {
    counters: CounterSet,
    tracker: LifecycleTracker,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one lifecycle event.
    pub fn record(&mut self, event: LifecycleEvent) {
        self.tracker.apply(event, &mut self.counters);
    }

    pub fn add(&mut self, counter: Counter, delta: u64) {
        self.counters.add(counter, delta);
    }

    pub fn increment(&mut self, counter: Counter) {
        self.counters.increment(counter);
    }

    /// Zeroes every counter and forgets all per-id state.
    pub fn reset(&mut self) {
        self.counters.clear();
        self.tracker.clear();
    }

    /// Full report in the fixed counter order.
    pub fn snapshot(&self) -> String {
        self.counters.render()
    }

    /// Takes the report and resets in one step.
    pub fn stats_reset(&mut self) -> String {
        let report = self.snapshot();
        self.reset();
        report
    }

    /// Value of the counter called `name`; unknown names read as zero.
    pub fn read(&self, name: &str) -> u64 {
        Counter::from_name(name).map_or(0, |c| self.counters.get(c))
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(counter)
    }

    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }
}

impl CounterSink for CounterStore {
    fn record(&mut self, event: LifecycleEvent) {
        CounterStore::record(self, event);
    }
}

/// Cloneable handle to a [`CounterStore`] guarded by a single mutex.
///
/// Each operation holds the lock for its whole duration, so a reader never observes the
/// counters and the per-id maps out of step with each other.
#[derive(Debug, Clone, Default)]
pub struct SharedCounterStore {
    inner: Arc<Mutex<CounterStore>>,
}

impl SharedCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CounterStore> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: LifecycleEvent) {
        self.lock().record(event);
    }

    pub fn add(&self, counter: Counter, delta: u64) {
        self.lock().add(counter, delta);
    }

    pub fn increment(&self, counter: Counter) {
        self.lock().increment(counter);
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn snapshot(&self) -> String {
        self.lock().snapshot()
    }

    pub fn stats_reset(&self) -> String {
        self.lock().stats_reset()
    }

    pub fn read(&self, name: &str) -> u64 {
        self.lock().read(name)
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.lock().get(counter)
    }

    /// Runs `f` against the store while holding the lock.
    pub fn with_store<T>(&self, f: impl FnOnce(&CounterStore) -> T) -> T {
        f(&self.lock())
    }
}

impl CounterSink for SharedCounterStore {
    fn record(&mut self, event: LifecycleEvent) {
        SharedCounterStore::record(self, event);
    }
}
