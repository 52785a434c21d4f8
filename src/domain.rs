//! ==============================================================================
//! domain.rs - readings and the per-device aggregate
//! ==============================================================================
//!
//! purpose:
//!     the merge rule lives here: a timestamp is accepted once, the first
//!     time it is seen, and every accepted count is added to the running
//!     total. the newest accepted reading is tracked alongside.
//!
//! relationships:
//!     - used by: store.rs (DeviceAggregate::merge), ingest.rs (RawReading)
//!     - uses: time_codec.rs (Timestamp)
//!
//! ==============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time_codec::Timestamp;

/// a reading as it arrives off the wire, before the timestamp is validated
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawReading {
    /// timestamp text, expected in the layout `2024-01-01T00:00:00+00:00`
    pub timestamp: String,
    /// counter value reported for that instant
    pub count: i64,
}

impl RawReading {
    pub fn new(timestamp: impl Into<String>, count: i64) -> Self {
        Self {
            timestamp: timestamp.into(),
            count,
        }
    }
}

/// a validated reading
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
pub struct Reading {
    pub timestamp: Timestamp,
    pub count: i64,
}

impl Reading {
    pub fn new(timestamp: Timestamp, count: i64) -> Self {
        Self { timestamp, count }
    }
}

/// what one merge did with its batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// readings committed to the ledger
    pub applied: usize,
    /// readings dropped because their timestamp was already accepted,
    /// or was superseded later in the same batch
    pub duplicates: usize,
}

/// accumulated state for one device
///
/// `seen` is the dedup ledger: once a timestamp is in it, no later reading
/// for that instant is applied. `total_count` is always the sum of the
/// ledger and `latest` always holds its greatest key.
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct DeviceAggregate {
    id: String,
    seen: BTreeMap<Timestamp, i64>,
    /// wider than a count so the sum of any ledger fits exactly
    total_count: i128,
    latest: Option<Reading>,
}

impl DeviceAggregate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seen: BTreeMap::new(),
            total_count: 0,
            latest: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total_count(&self) -> i128 {
        self.total_count
    }

    /// newest reading ever accepted, `None` until the first one
    pub fn latest(&self) -> Option<Reading> {
        self.latest
    }

    /// number of distinct timestamps accepted so far
    pub fn distinct_readings(&self) -> usize {
        self.seen.len()
    }

    pub fn readings(&self) -> impl Iterator<Item = Reading> + '_ {
        self.seen.iter().map(|(ts, count)| Reading::new(*ts, *count))
    }

    /// Merge a batch into this aggregate.
    ///
    /// Readings whose timestamp is already in the ledger are skipped. When
    /// the batch itself repeats a timestamp, the last occurrence wins and
    /// the earlier ones count as duplicates. An empty batch leaves the
    /// aggregate untouched.
    pub fn merge<I>(&mut self, batch: I) -> MergeStats
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut stats = MergeStats::default();
        let mut staged: BTreeMap<Timestamp, i64> = BTreeMap::new();

        for reading in batch {
            if self.seen.contains_key(&reading.timestamp) {
                stats.duplicates += 1;
                continue;
            }
            // remove first so the later reading's offset is kept too
            if staged.remove(&reading.timestamp).is_some() {
                stats.duplicates += 1;
            }
            staged.insert(reading.timestamp, reading.count);
        }

        if let Some((&newest, &count)) = staged.last_key_value() {
            let newer = self.latest.map_or(true, |l| newest > l.timestamp);
            if newer {
                self.latest = Some(Reading::new(newest, count));
            }
        }

        for (timestamp, count) in staged {
            self.total_count += i128::from(count);
            self.seen.insert(timestamp, count);
            stats.applied += 1;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_codec::TimeCodec;

    fn reading(ts: &str, count: i64) -> Reading {
        Reading::new(TimeCodec::parse(ts).unwrap(), count)
    }

    fn assert_invariants(agg: &DeviceAggregate) {
        let sum: i128 = agg.readings().map(|r| i128::from(r.count)).sum();
        assert_eq!(agg.total_count(), sum);
        let max = agg.readings().map(|r| r.timestamp).max();
        assert_eq!(agg.latest().map(|r| r.timestamp), max);
    }

    #[test]
    fn fresh_aggregate_is_empty() {
        let agg = DeviceAggregate::new("d1");
        assert_eq!(agg.id(), "d1");
        assert_eq!(agg.total_count(), 0);
        assert_eq!(agg.latest(), None);
        assert_eq!(agg.distinct_readings(), 0);
    }

    #[test]
    fn empty_batch_changes_nothing() {
        let mut agg = DeviceAggregate::new("d1");
        agg.merge(vec![reading("2024-01-01T00:00:00+00:00", 5)]);
        let before = agg.clone();

        let stats = agg.merge(Vec::new());
        assert_eq!(stats, MergeStats::default());
        assert_eq!(agg, before);
    }

    #[test]
    fn merge_sums_distinct_readings_and_tracks_latest() {
        let mut agg = DeviceAggregate::new("d1");
        let stats = agg.merge(vec![
            reading("2024-01-01T00:00:00+00:00", 5),
            reading("2024-01-01T01:00:00+00:00", 3),
        ]);
        assert_eq!(stats.applied, 2);
        assert_eq!(agg.total_count(), 8);
        assert_eq!(agg.latest(), Some(reading("2024-01-01T01:00:00+00:00", 3)));

        let stats = agg.merge(vec![
            reading("2024-01-01T01:00:00+00:00", 99),
            reading("2024-01-01T02:00:00+00:00", 1),
        ]);
        assert_eq!(stats, MergeStats { applied: 1, duplicates: 1 });
        assert_eq!(agg.total_count(), 9);
        assert_eq!(agg.latest(), Some(reading("2024-01-01T02:00:00+00:00", 1)));
        let stored: Vec<i64> = agg.readings().map(|r| r.count).collect();
        assert_eq!(stored, vec![5, 3, 1]);
        assert_invariants(&agg);
    }

    #[test]
    fn older_readings_do_not_move_latest() {
        let mut agg = DeviceAggregate::new("d1");
        agg.merge(vec![reading("2024-01-02T00:00:00+00:00", 1)]);
        agg.merge(vec![reading("2024-01-01T00:00:00+00:00", 7)]);

        assert_eq!(agg.total_count(), 8);
        assert_eq!(agg.latest(), Some(reading("2024-01-02T00:00:00+00:00", 1)));
        assert_invariants(&agg);
    }

    #[test]
    fn same_batch_twice_is_idempotent() {
        let batch = vec![
            reading("2024-01-01T00:00:00+00:00", 2),
            reading("2024-01-01T00:05:00+00:00", 4),
            reading("2024-01-01T00:10:00+00:00", 6),
        ];
        let mut agg = DeviceAggregate::new("d1");
        agg.merge(batch.clone());
        let once = agg.clone();

        let stats = agg.merge(batch);
        assert_eq!(stats, MergeStats { applied: 0, duplicates: 3 });
        assert_eq!(agg, once);
    }

    #[test]
    fn repeated_timestamp_in_one_batch_last_wins() {
        let mut agg = DeviceAggregate::new("d1");
        let stats = agg.merge(vec![
            reading("2024-01-01T00:00:00+00:00", 10),
            reading("2024-01-01T00:00:00+00:00", 20),
        ]);
        assert_eq!(stats, MergeStats { applied: 1, duplicates: 1 });
        assert_eq!(agg.total_count(), 20);
        assert_eq!(agg.latest().map(|r| r.count), Some(20));
        assert_invariants(&agg);
    }

    #[test]
    fn equal_instants_with_different_offsets_dedup() {
        let mut agg = DeviceAggregate::new("d1");
        agg.merge(vec![reading("2024-01-01T01:00:00+00:00", 3)]);
        let stats = agg.merge(vec![reading("2024-01-01T02:00:00+01:00", 50)]);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(agg.total_count(), 3);
    }

    #[test]
    fn totals_and_latest_never_go_backwards() {
        let batches = vec![
            vec![reading("2024-03-01T00:00:00+00:00", 1)],
            vec![reading("2024-01-01T00:00:00+00:00", 2)],
            vec![
                reading("2024-05-01T00:00:00+02:00", 3),
                reading("2024-03-01T00:00:00+00:00", 4),
            ],
            vec![],
            vec![reading("2024-04-30T23:00:00+00:00", 0)],
        ];

        let mut agg = DeviceAggregate::new("d1");
        let mut last_total = agg.total_count();
        let mut last_latest = agg.latest().map(|r| r.timestamp);
        for batch in batches {
            agg.merge(batch);
            assert!(agg.total_count() >= last_total);
            assert!(agg.latest().map(|r| r.timestamp) >= last_latest);
            last_total = agg.total_count();
            last_latest = agg.latest().map(|r| r.timestamp);
            assert_invariants(&agg);
        }
        assert_eq!(agg.total_count(), 6);
        assert_eq!(agg.distinct_readings(), 4);
    }

    #[test]
    fn total_stays_exact_past_i64_range() {
        let mut agg = DeviceAggregate::new("d1");
        agg.merge(vec![reading("2024-01-01T00:00:00+00:00", i64::MAX)]);
        agg.merge(vec![reading("2024-01-01T01:00:00+00:00", 1)]);
        agg.merge(vec![reading("2024-01-01T02:00:00+00:00", -1)]);

        assert_eq!(agg.total_count(), i128::from(i64::MAX));
        assert_invariants(&agg);

        agg.merge(vec![
            reading("2024-01-01T03:00:00+00:00", i64::MAX),
            reading("2024-01-01T04:00:00+00:00", i64::MAX),
        ]);
        assert_eq!(agg.total_count(), 3 * i128::from(i64::MAX));
        assert_invariants(&agg);
    }
}
