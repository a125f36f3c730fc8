//! In-memory sample buffering.

use ahash::AHashMap;
use regex::Regex;
use tracing::trace;

/// A single buffered measurement.
///
/// Ephemeral: exists only between being recorded and its key being drained.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Recorded value.
    pub value: f64,

    /// Unix timestamp, in milliseconds, at which the value was recorded.
    pub collected_at: u64,
}

/// Buffered samples for a set of keys, keyed by metric key and then source.
pub type DrainedSamples = AHashMap<String, AHashMap<String, Vec<Sample>>>;

/// In-memory store of raw samples, keyed by metric key and source.
///
/// Owned exclusively by one engine instance. Samples for each (key, source) pair are kept in insertion order.
pub struct SampleBuffer {
    samples: DrainedSamples,
    blacklist: Vec<Regex>,
}

impl SampleBuffer {
    /// Creates a new `SampleBuffer` with the given key blacklist.
    pub fn new(blacklist: Vec<Regex>) -> Self {
        Self {
            samples: AHashMap::default(),
            blacklist,
        }
    }

    /// Appends a sample for the given key and source.
    ///
    /// Keys matching any blacklist pattern are silently dropped; the return value indicates whether the sample was
    /// buffered.
    pub fn record(&mut self, key: &str, value: f64, source: &str, collected_at: u64) -> bool {
        if self.blacklist.iter().any(|pattern| pattern.is_match(key)) {
            trace!(key, "Dropping sample for blacklisted key.");
            return false;
        }

        self.samples
            .entry(key.to_string())
            .or_default()
            .entry(source.to_string())
            .or_default()
            .push(Sample { value, collected_at });

        true
    }

    /// Removes and returns all buffered samples for the given keys.
    ///
    /// This is the drain snapshot for a flush cycle: samples recorded for a drained key after this call land in
    /// fresh buffer entries and survive into the next cycle.
    pub fn drain(&mut self, keys: &[String]) -> DrainedSamples {
        let mut drained = DrainedSamples::default();
        for key in keys {
            if let Some(by_source) = self.samples.remove(key) {
                drained.insert(key.clone(), by_source);
            }
        }
        drained
    }

    /// Returns the keys with at least one buffered sample, across any source.
    pub fn buffered_keys(&self) -> Vec<String> {
        self.samples.keys().cloned().collect()
    }

    /// Returns the buffered samples for the given key and source, if any.
    pub fn get(&self, key: &str, source: &str) -> Option<&[Sample]> {
        self.samples
            .get(key)
            .and_then(|by_source| by_source.get(source))
            .map(Vec::as_slice)
    }

    /// Returns a reference to all buffered samples.
    pub(crate) fn samples(&self) -> &DrainedSamples {
        &self.samples
    }
}
