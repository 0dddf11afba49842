/// Stateful hanging-task detection.
///
/// The tracker keeps one record per live stack fingerprint and diffs
/// successive samples. A task whose fingerprint stays bit-identical for at
/// least the configured dwell time is classified as hanging. The map is
/// confined to the hanging watcher's task, so no locking is involved.
use crate::sampler::StackFingerprint;
use chrono::{DateTime, Duration, Local};
use std::collections::{HashMap, HashSet};

/// Per-task tracker state.
#[derive(Debug, Clone)]
pub struct StackRecord {
    /// Fingerprint from the immediately prior sample; zero at birth.
    pub previous: StackFingerprint,
    /// Fingerprint from the most recent sample. Always equals the map key.
    pub current: StackFingerprint,
    /// Timestamp of the most recent sample.
    pub sampled_at: DateTime<Local>,
    /// Timestamp of the most recent sample in which `current` differed
    /// from `previous`.
    pub last_changed_at: DateTime<Local>,
}

/// Tracks stack fingerprints across sampling ticks and classifies tasks
/// whose stack has not moved for longer than the dwell time.
pub struct HangTracker {
    dwell: Duration,
    records: HashMap<StackFingerprint, StackRecord>,
}

impl HangTracker {
    pub fn new(dwell_ms: u64) -> Self {
        HangTracker {
            dwell: Duration::milliseconds(dwell_ms as i64),
            records: HashMap::new(),
        }
    }

    /// Fold one sampling tick into the tracker and return the records
    /// classified as hanging at this tick.
    ///
    /// Per tick: reconcile the live set into the map (new fingerprints are
    /// born with a zero `previous`), evict records whose fingerprint left
    /// the live set, refresh `last_changed_at` for records whose stack
    /// moved, then classify. The dwell comparison is inclusive: with
    /// interval == dwell, a task unchanged across exactly two ticks
    /// qualifies.
    pub fn observe(
        &mut self,
        live: &[StackFingerprint],
        now: DateTime<Local>,
    ) -> Vec<StackRecord> {
        let mut seen: HashSet<StackFingerprint> = HashSet::with_capacity(live.len());
        for fp in live {
            // Identical fingerprints at one tick collapse into one record:
            // the fingerprint is the identity.
            match self.records.get_mut(fp) {
                None => {
                    self.records.insert(
                        *fp,
                        StackRecord {
                            previous: StackFingerprint::ZERO,
                            current: *fp,
                            sampled_at: now,
                            last_changed_at: now,
                        },
                    );
                }
                Some(record) => {
                    record.previous = record.current;
                    record.current = *fp;
                    record.sampled_at = now;
                }
            }
            seen.insert(*fp);
        }

        self.records.retain(|fp, _| seen.contains(fp));

        let mut hanging = Vec::new();
        for record in self.records.values_mut() {
            if record.previous == record.current {
                if now - record.last_changed_at >= self.dwell {
                    hanging.push(record.clone());
                }
            } else {
                record.last_changed_at = now;
            }
        }
        hanging
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fp(seed: u64) -> StackFingerprint {
        StackFingerprint::from_frames(&[seed, seed + 1, seed + 2])
    }

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap()
    }

    fn at_ms(offset_ms: i64) -> DateTime<Local> {
        t0() + Duration::milliseconds(offset_ms)
    }

    #[test]
    fn test_first_observation_creates_record_with_zero_previous() {
        let mut tracker = HangTracker::new(10_000);
        let hanging = tracker.observe(&[fp(1)], t0());
        assert!(hanging.is_empty());

        let record = tracker.records.get(&fp(1)).unwrap();
        assert_eq!(record.previous, StackFingerprint::ZERO);
        assert_eq!(record.current, fp(1));
        assert_eq!(record.sampled_at, t0());
        assert_eq!(record.last_changed_at, t0());
    }

    #[test]
    fn test_key_always_equals_current() {
        let mut tracker = HangTracker::new(10_000);
        tracker.observe(&[fp(1), fp(2)], t0());
        tracker.observe(&[fp(1), fp(2)], at_ms(1000));
        for (key, record) in &tracker.records {
            assert_eq!(*key, record.current);
        }
    }

    #[test]
    fn test_last_changed_never_exceeds_sampled_at() {
        let mut tracker = HangTracker::new(10_000);
        for tick in 0..5 {
            tracker.observe(&[fp(1)], at_ms(tick * 1000));
            for record in tracker.records.values() {
                assert!(record.last_changed_at <= record.sampled_at);
                assert!(record.sampled_at <= at_ms(tick * 1000));
            }
        }
    }

    #[test]
    fn test_unchanged_stack_hangs_after_dwell() {
        let mut tracker = HangTracker::new(10_000);
        assert!(tracker.observe(&[fp(1)], at_ms(0)).is_empty());
        assert!(tracker.observe(&[fp(1)], at_ms(5000)).is_empty());
        let hanging = tracker.observe(&[fp(1)], at_ms(10_000));
        assert_eq!(hanging.len(), 1);
        assert_eq!(hanging[0].current, fp(1));
        assert_eq!(hanging[0].last_changed_at, at_ms(0));
        assert_eq!(hanging[0].sampled_at, at_ms(10_000));
    }

    #[test]
    fn test_dwell_boundary_is_inclusive() {
        // interval == dwell: unchanged across exactly two ticks qualifies.
        let mut tracker = HangTracker::new(5000);
        assert!(tracker.observe(&[fp(1)], at_ms(0)).is_empty());
        let hanging = tracker.observe(&[fp(1)], at_ms(5000));
        assert_eq!(hanging.len(), 1);
    }

    #[test]
    fn test_hanging_reported_on_every_qualifying_tick() {
        let mut tracker = HangTracker::new(5000);
        tracker.observe(&[fp(1)], at_ms(0));
        assert_eq!(tracker.observe(&[fp(1)], at_ms(5000)).len(), 1);
        assert_eq!(tracker.observe(&[fp(1)], at_ms(10_000)).len(), 1);
    }

    #[test]
    fn test_absent_fingerprint_is_evicted() {
        let mut tracker = HangTracker::new(10_000);
        tracker.observe(&[fp(1), fp(2)], at_ms(0));
        assert_eq!(tracker.len(), 2);

        tracker.observe(&[fp(2)], at_ms(1000));
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.records.contains_key(&fp(1)));
    }

    #[test]
    fn test_reappearance_restarts_dwell() {
        let mut tracker = HangTracker::new(5000);
        tracker.observe(&[fp(1)], at_ms(0));
        // Gone for one tick, record evicted.
        tracker.observe(&[], at_ms(1000));
        assert!(tracker.is_empty());
        // Back again: dwell counts from rebirth, not first sight.
        tracker.observe(&[fp(1)], at_ms(2000));
        assert!(tracker.observe(&[fp(1)], at_ms(6000)).is_empty());
        assert_eq!(tracker.observe(&[fp(1)], at_ms(7000)).len(), 1);
    }

    #[test]
    fn test_task_gone_within_one_interval_never_reported() {
        let mut tracker = HangTracker::new(1000);
        assert!(tracker.observe(&[fp(1)], at_ms(0)).is_empty());
        assert!(tracker.observe(&[], at_ms(1000)).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_duplicate_fingerprints_collapse() {
        let mut tracker = HangTracker::new(5000);
        tracker.observe(&[fp(1), fp(1), fp(1)], at_ms(0));
        assert_eq!(tracker.len(), 1);
        let hanging = tracker.observe(&[fp(1), fp(1)], at_ms(5000));
        assert_eq!(hanging.len(), 1);
    }

    #[test]
    fn test_changing_stack_never_hangs() {
        let mut tracker = HangTracker::new(2000);
        // Each tick shows a different fingerprint, so the old record is
        // evicted and a fresh one born; dwell never accumulates.
        for tick in 0..10 {
            let hanging = tracker.observe(&[fp(100 + tick)], at_ms(tick as i64 * 1000));
            assert!(hanging.is_empty());
        }
    }

    #[test]
    fn test_mixed_live_set_reports_only_stuck_tasks() {
        let mut tracker = HangTracker::new(4000);
        tracker.observe(&[fp(1), fp(2), fp(50)], at_ms(0));
        tracker.observe(&[fp(1), fp(2), fp(51)], at_ms(2000));
        let hanging = tracker.observe(&[fp(1), fp(2), fp(52)], at_ms(4000));
        let mut stuck: Vec<StackFingerprint> = hanging.iter().map(|r| r.current).collect();
        stuck.sort_by_key(|f| f.0[0]);
        assert_eq!(stuck, vec![fp(1), fp(2)]);
    }
}
