//! Bounded tick window with incremental digit counts

use super::tick::TickSample;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

/// Ring buffer of recent ticks
///
/// The per-digit table is updated on every push and eviction, so statistics
/// never rescan the buffer.
#[derive(Debug, Clone)]
pub struct TickWindow {
    samples: VecDeque<TickSample>,
    counts: [usize; 10],
    capacity: usize,
}

impl TickWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            counts: [0; 10],
            capacity,
        }
    }

    /// Append a sample, returning the evicted one when full
    pub fn push(&mut self, sample: TickSample) -> Option<TickSample> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            self.counts[old.digit as usize] -= 1;
        }
        self.counts[sample.digit as usize] += 1;
        self.samples.push_back(sample);
        evicted
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = TickSample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn counts(&self) -> &[usize; 10] {
        &self.counts
    }

    pub fn latest(&self) -> Option<&TickSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickSample> {
        self.samples.iter()
    }

    /// The most recent `n` digits, oldest first
    pub fn last_digits(&self, n: usize) -> impl Iterator<Item = u8> + '_ {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.digit)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.counts = [0; 10];
    }

    /// Percent of samples whose digit satisfies `class`
    pub fn share(&self, class: impl Fn(u8) -> bool) -> Decimal {
        let hits: usize = (0..10u8)
            .filter(|d| class(*d))
            .map(|d| self.counts[d as usize])
            .sum();
        percent(hits, self.samples.len())
    }

    /// Share of `class` over the last `states` window states, oldest first
    ///
    /// State `j` is the window without its newest `j` samples.
    pub fn share_trend(&self, states: usize, class: impl Fn(u8) -> bool) -> Vec<Decimal> {
        let len = self.samples.len();
        let states = states.min(len);
        let mut hits: usize = (0..10u8)
            .filter(|d| class(*d))
            .map(|d| self.counts[d as usize])
            .sum();

        let mut trend = Vec::with_capacity(states);
        for (j, sample) in self.samples.iter().rev().take(states).enumerate() {
            trend.push(percent(hits, len - j));
            if class(sample.digit) {
                hits -= 1;
            }
        }
        trend.reverse();
        trend
    }

    pub fn digit_stats(&self) -> DigitStats {
        DigitStats::from_counts(self.counts)
    }
}

fn percent(part: usize, total: usize) -> Decimal {
    if total == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(part as u64) * Decimal::ONE_HUNDRED / Decimal::from(total as u64)).round_dp(4)
}

/// Digit distribution of a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigitStats {
    pub total: usize,
    pub counts: [usize; 10],
    pub percentages: [Decimal; 10],
    /// Ties resolve to the lowest digit
    pub most_frequent: u8,
    /// Ties resolve to the lowest digit
    pub least_frequent: u8,
    /// Shannon entropy in bits; 0 for an empty window, at most log2(10)
    pub entropy: f64,
}

impl DigitStats {
    pub fn from_counts(counts: [usize; 10]) -> Self {
        let total: usize = counts.iter().sum();
        let percentages = counts.map(|c| percent(c, total));

        let mut most = 0usize;
        let mut least = 0usize;
        for digit in 1..10 {
            if counts[digit] > counts[most] {
                most = digit;
            }
            if counts[digit] < counts[least] {
                least = digit;
            }
        }

        let entropy = if total == 0 {
            0.0
        } else {
            counts
                .iter()
                .filter(|c| **c > 0)
                .map(|c| {
                    let p = *c as f64 / total as f64;
                    -p * p.log2()
                })
                .sum()
        };

        Self {
            total,
            counts,
            percentages,
            most_frequent: most as u8,
            least_frequent: least as u8,
            entropy,
        }
    }

    pub fn percentage(&self, digit: u8) -> Decimal {
        self.percentages[digit as usize % 10]
    }
}
