// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The closed set of counters and their fixed report order.

use std::fmt::{self, Write};

use crate::constants::NAME_COLUMN_WIDTH;

/// One of the ten cumulative counters. Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    BytesReceived,
    BytesDelivered,
    Received,
    Delivered,
    Forwarded,
    Deferred,
    Bounced,
    Rejected,
    Held,
    Discarded,
}

impl Counter {
    pub const ALL: [Counter; 10] = [
        Counter::BytesReceived,
        Counter::BytesDelivered,
        Counter::Received,
        Counter::Delivered,
        Counter::Forwarded,
        Counter::Deferred,
        Counter::Bounced,
        Counter::Rejected,
        Counter::Held,
        Counter::Discarded,
    ];

    /// Looks up a counter by its wire name. Names are case sensitive.
    pub fn from_name(name: &str) -> Option<Counter> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::BytesReceived => "bytes-received",
            Counter::BytesDelivered => "bytes-delivered",
            Counter::Received => "received",
            Counter::Delivered => "delivered",
            Counter::Forwarded => "forwarded",
            Counter::Deferred => "deferred",
            Counter::Bounced => "bounced",
            Counter::Rejected => "rejected",
            Counter::Held => "held",
            Counter::Discarded => "discarded",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Current value of every counter, all starting at zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CounterSet {
    values: [u64; 10],
}

impl CounterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()]
    }

    /// Adds `delta`, saturating at `u64::MAX`.
    pub fn add(&mut self, counter: Counter, delta: u64) {
        let slot = &mut self.values[counter.index()];
        *slot = slot.saturating_add(delta);
    }

    pub fn increment(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn clear(&mut self) {
        self.values = [0; 10];
    }

    /// Iterates `(counter, value)` pairs in report order.
    pub fn iter(&self) -> impl Iterator<Item = (Counter, u64)> + '_ {
        Counter::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    /// Renders the stats report: one `name value` line per counter, name left-justified.
    pub fn render(&self) -> String {
        let mut report = String::with_capacity(Counter::ALL.len() * 24);
        for (counter, value) in self.iter() {
            // Writing into a String cannot fail.
            let _ = writeln!(
                report,
                "{:<width$}{}",
                counter.as_str(),
                value,
                width = NAME_COLUMN_WIDTH
            );
        }
        report
    }
}
