//! Conversion of monotonic kernel counters into per-interval deltas

use serde::Serialize;
use std::collections::HashMap;

/// Result of one counter observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Delta {
    /// Difference from the previous absolute value (0 when not valid)
    pub value: i64,
    /// False on the first observation of a counter, when no baseline exists
    pub valid: bool,
}

/// Remembers the previous absolute value of every `(source, field)` counter
///
/// The baseline is replaced on every call. A counter that resets in the kernel
/// shows up as a negative delta, which callers may treat as a reset signal.
#[derive(Debug, Default)]
pub struct CounterNormalizer {
    baselines: HashMap<String, HashMap<String, i64>>,
}

impl CounterNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current absolute value of `field` for `source`
    ///
    /// # Examples
    ///
    /// ```
    /// use zview::history::CounterNormalizer;
    ///
    /// let mut normalizer = CounterNormalizer::new();
    /// assert!(!normalizer.delta("arc", "hits", 100).valid);
    /// let delta = normalizer.delta("arc", "hits", 130);
    /// assert!(delta.valid);
    /// assert_eq!(delta.value, 30);
    /// ```
    pub fn delta(&mut self, source: &str, field: &str, absolute: i64) -> Delta {
        let fields = self.baselines.entry(source.to_string()).or_default();
        match fields.insert(field.to_string(), absolute) {
            Some(previous) => Delta {
                value: absolute.wrapping_sub(previous),
                valid: true,
            },
            None => Delta {
                value: 0,
                valid: false,
            },
        }
    }

    /// Drop every baseline of `source`; its next observation starts over
    pub fn forget(&mut self, source: &str) {
        self.baselines.remove(source);
    }

    /// Whether any baseline is held for `source`
    pub fn knows(&self, source: &str) -> bool {
        self.baselines.contains_key(source)
    }
}

/// `100 * part / total` rounded to two decimals, or 100 when `total` is zero
pub fn percent_or_full(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (10_000.0 * part as f64 / total as f64).round() / 100.0
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // First result invalid, every later one the exact difference from its predecessor
    #[quickcheck]
    fn prop_deltas_follow_monotonic_sequence(steps: Vec<u32>) -> bool {
        let mut normalizer = CounterNormalizer::new();
        let mut absolute: i64 = 0;
        let mut previous: Option<i64> = None;

        for step in steps {
            absolute += step as i64;
            let delta = normalizer.delta("source", "counter", absolute);
            let ok = match previous {
                None => !delta.valid,
                Some(prev) => delta.valid && delta.value == absolute - prev,
            };
            if !ok {
                return false;
            }
            previous = Some(absolute);
        }
        true
    }

    #[quickcheck]
    fn prop_percent_is_bounded(hits: u16, misses: u16) -> bool {
        let rate = percent_or_full(hits as i64, hits as i64 + misses as i64);
        (0.0..=100.0).contains(&rate)
    }
}
