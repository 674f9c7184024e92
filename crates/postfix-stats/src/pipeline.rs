// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use tracing::{debug, trace, warn};

use crate::classifier::classify;
use crate::source::LineSource;
use crate::store::CounterSink;

/// Totals for one run of [`consume`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines pulled from the source.
    pub lines: u64,
    /// Lines that produced a lifecycle event.
    pub events: u64,
    /// Lines that matched a rule but could not be used.
    pub errors: u64,
}

/// Feeds every line of `source` through the classifier into `sink` until the source ends.
///
/// Lines that fail classification are reported and skipped. A read error from the source
/// stops the run and is returned.
pub async fn consume<S, K>(source: &mut S, sink: &mut K) -> io::Result<IngestSummary>
where
    S: LineSource + ?Sized,
    K: CounterSink + ?Sized,
{
    let mut summary = IngestSummary::default();
    while let Some(line) = source.next_line().await? {
        summary.lines += 1;
        match classify(&line) {
            Ok(Some(event)) => {
                trace!("Classified {:?} from {}", event, line);
                sink.record(event);
                summary.events += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping log line: {}", e);
                summary.errors += 1;
            }
        }
    }
    debug!(
        "Log source exhausted after {} lines ({} events, {} errors)",
        summary.lines, summary.events, summary.errors
    );
    Ok(summary)
}
