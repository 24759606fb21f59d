//! Per-stream symbol histograms.
//!
//! One histogram per event stream, each behind its own mutex. The router
//! adds weights on the control loop thread while the renderer snapshots and
//! formats on its own schedule; the per-stream locks are the only point of
//! contention between the two.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;

use crate::cli::SortKey;

struct Histogram {
    /// Accumulated weight per symbol name.
    weights: HashMap<String, u64>,
    total: u64,
    samples: u64,
}

impl Histogram {
    fn new() -> Self {
        Histogram { weights: HashMap::new(), total: 0, samples: 0 }
    }
}

/// The shared histogram set.
pub struct Hists {
    streams: Vec<Mutex<Histogram>>,
    names: Vec<String>,
    sort_keys: Vec<SortKey>,
}

impl Hists {
    #[must_use]
    pub fn new(names: Vec<String>, sort_keys: Vec<SortKey>) -> Self {
        let streams = names.iter().map(|_| Mutex::new(Histogram::new())).collect();
        Hists { streams, names, sort_keys }
    }

    #[must_use]
    pub fn nr_streams(&self) -> usize {
        self.streams.len()
    }

    /// Charge `period` to a symbol on one stream. Out-of-range streams are
    /// dropped; they can only come from a corrupt stream id.
    pub fn add(&self, stream: usize, symbol: &str, period: u64) {
        let Some(slot) = self.streams.get(stream) else {
            return;
        };
        let mut hist = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *hist.weights.entry(symbol.to_string()).or_insert(0) += period;
        hist.total += period;
        hist.samples += 1;
    }

    /// Total accumulated weight across all streams. The control loop uses
    /// this to tell whether a drain pass made progress.
    #[must_use]
    pub fn total_period(&self) -> u64 {
        self.streams
            .iter()
            .map(|s| s.lock().unwrap_or_else(std::sync::PoisonError::into_inner).total)
            .sum()
    }

    /// Snapshot one stream and render it into at most `height` lines of at
    /// most `width` columns, sorted by the configured keys.
    #[must_use]
    pub fn collapse_and_format(&self, stream: usize, width: usize, height: usize) -> String {
        let Some(slot) = self.streams.get(stream) else {
            return String::new();
        };
        let (mut rows, total, samples) = {
            let hist = slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let rows: Vec<(String, u64)> =
                hist.weights.iter().map(|(k, &v)| (k.clone(), v)).collect();
            (rows, hist.total, hist.samples)
        };

        rows.sort_unstable_by(|a, b| {
            for key in &self.sort_keys {
                let ord = match key {
                    SortKey::Period => b.1.cmp(&a.1),
                    SortKey::Symbol => a.0.cmp(&b.0),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            // Stable final tiebreak so equal rows do not shuffle between
            // refreshes.
            a.0.cmp(&b.0)
        });

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}: {samples} samples, {total} events",
            self.names.get(stream).map_or("?", String::as_str)
        );

        let body_rows = height.saturating_sub(1);
        for (name, weight) in rows.iter().take(body_rows) {
            let pct = if total > 0 {
                #[allow(clippy::cast_precision_loss)]
                {
                    *weight as f64 / total as f64 * 100.0
                }
            } else {
                0.0
            };
            let mut line = format!("{pct:>6.2}% {weight:>12}  {name}");
            line.truncate(width);
            let _ = writeln!(out, "{line}");
        }
        out
    }
}
