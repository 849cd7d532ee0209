//! Reveal Schedule
//!
//! Derives, from a round's start and end times, the ordered list of moments
//! at which each secret slot becomes public. Nothing here is stored: the
//! schedule is recomputed on every tick, so a late tick (or a restarted
//! process) catches up by simply asking which slots are due now.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Deserialize};

/// Reveal cadence.
///
/// Slot indices are 1-based. Slots listed here that exceed the secret length
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealPolicy {
    /// Slots disclosed the moment the round opens.
    pub initial_slots: Vec<usize>,
    /// First slot disclosed after the opening.
    pub anchor_slot: usize,
    /// Offset of the anchor reveal from the round start.
    pub anchor_offset: Duration,
    /// Spacing of every remaining reveal after the anchor.
    pub step: Duration,
}

impl Default for RevealPolicy {
    fn default() -> Self {
        Self {
            initial_slots: vec![1, 10],
            anchor_slot: 4,
            anchor_offset: Duration::hours(24),
            step: Duration::hours(4),
        }
    }
}

/// One scheduled disclosure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealEvent {
    /// When the slot becomes due.
    pub at: DateTime<Utc>,
    /// 1-based slot index.
    pub slot: usize,
}

/// Fully expanded schedule for one round.
#[derive(Debug, Clone)]
pub struct RevealSchedule {
    events: Vec<RevealEvent>,
    end_time: DateTime<Utc>,
    slot_count: usize,
}

impl RevealSchedule {
    /// Expand `policy` for a round of `slot_count` slots.
    ///
    /// Every slot appears exactly once. Reveal times never exceed `end_time`
    /// and are non-decreasing in list order. Slots not named by the policy
    /// follow the anchor in ascending index order.
    pub fn new(
        policy: &RevealPolicy,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        slot_count: usize,
    ) -> Self {
        let cap = |at: DateTime<Utc>| at.min(end_time);
        let in_range = |slot: usize| (1..=slot_count).contains(&slot);

        let mut events = Vec::with_capacity(slot_count);
        let mut scheduled = BTreeSet::new();

        for &slot in &policy.initial_slots {
            if in_range(slot) && scheduled.insert(slot) {
                events.push(RevealEvent { at: cap(start_time), slot });
            }
        }

        let mut at = start_time + policy.anchor_offset;
        if in_range(policy.anchor_slot) && scheduled.insert(policy.anchor_slot) {
            events.push(RevealEvent { at: cap(at), slot: policy.anchor_slot });
        }

        for slot in 1..=slot_count {
            if scheduled.contains(&slot) {
                continue;
            }
            at += policy.step;
            events.push(RevealEvent { at: cap(at), slot });
        }

        Self { events, end_time, slot_count }
    }

    /// All events in disclosure order.
    pub fn events(&self) -> &[RevealEvent] {
        &self.events
    }

    /// Number of slots covered.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Slots due at `now`. Once the round has ended every slot is due.
    pub fn due_at(&self, now: DateTime<Utc>) -> Vec<usize> {
        if now >= self.end_time {
            return (1..=self.slot_count).collect();
        }
        self.events
            .iter()
            .filter(|e| e.at <= now)
            .map(|e| e.slot)
            .collect()
    }

    /// Slots due at `now` that are not yet in `revealed`.
    pub fn pending<V>(&self, now: DateTime<Utc>, revealed: &BTreeMap<usize, V>) -> Vec<usize> {
        self.due_at(now)
            .into_iter()
            .filter(|slot| !revealed.contains_key(slot))
            .collect()
    }

    /// Time of the next unrevealed disclosure strictly after `now`.
    pub fn next_reveal_after<V>(
        &self,
        now: DateTime<Utc>,
        revealed: &BTreeMap<usize, V>,
    ) -> Option<DateTime<Utc>> {
        if now >= self.end_time {
            return None;
        }
        self.events
            .iter()
            .filter(|e| e.at > now && !revealed.contains_key(&e.slot))
            .map(|e| e.at)
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn reference(slot_count: usize) -> RevealSchedule {
        RevealSchedule::new(&RevealPolicy::default(), t0(), t0() + Duration::hours(72), slot_count)
    }

    #[test]
    fn test_reference_opening_reveals() {
        let schedule = reference(12);
        assert_eq!(schedule.due_at(t0()), vec![1, 10]);
        assert_eq!(schedule.due_at(t0() + Duration::hours(23)), vec![1, 10]);
        assert_eq!(schedule.due_at(t0() + Duration::hours(24)), vec![1, 10, 4]);
    }

    #[test]
    fn test_four_slots_at_twenty_eight_hours() {
        let schedule = reference(12);
        let due = schedule.due_at(t0() + Duration::hours(28));
        assert_eq!(due, vec![1, 10, 4, 2]);
    }

    #[test]
    fn test_remaining_slots_ascending_every_four_hours() {
        let schedule = reference(12);
        let tail: Vec<(i64, usize)> = schedule.events()[3..]
            .iter()
            .map(|e| ((e.at - t0()).num_hours(), e.slot))
            .collect();
        assert_eq!(
            tail,
            vec![(28, 2), (32, 3), (36, 5), (40, 6), (44, 7), (48, 8), (52, 9), (56, 11), (60, 12)]
        );
    }

    #[test]
    fn test_times_capped_at_end() {
        let end = t0() + Duration::hours(30);
        let schedule = RevealSchedule::new(&RevealPolicy::default(), t0(), end, 12);
        assert!(schedule.events().iter().all(|e| e.at <= end));
        assert_eq!(schedule.due_at(end - Duration::seconds(1)).len(), 4);
        assert_eq!(schedule.due_at(end).len(), 12);
    }

    #[test]
    fn test_short_secret_skips_out_of_range_policy_slots() {
        let schedule = reference(3);
        let slots: Vec<usize> = schedule.events().iter().map(|e| e.slot).collect();
        assert_eq!(slots, vec![1, 2, 3]);
        // Slot 1 at open, then 2 and 3 follow the (absent) anchor.
        assert_eq!(schedule.due_at(t0()), vec![1]);
        assert_eq!(schedule.due_at(t0() + Duration::hours(28)), vec![1, 2]);
    }

    #[test]
    fn test_everything_due_after_end() {
        let schedule = reference(12);
        let due = schedule.due_at(t0() + Duration::hours(72));
        assert_eq!(due, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_pending_excludes_revealed() {
        let schedule = reference(12);
        let mut revealed = BTreeMap::new();
        revealed.insert(1usize, "alpha".to_string());
        let pending = schedule.pending(t0() + Duration::hours(24), &revealed);
        assert_eq!(pending, vec![10, 4]);
    }

    #[test]
    fn test_next_reveal_after() {
        let schedule = reference(12);
        let mut revealed = BTreeMap::new();
        revealed.insert(1usize, ());
        revealed.insert(10usize, ());
        assert_eq!(
            schedule.next_reveal_after(t0() + Duration::hours(1), &revealed),
            Some(t0() + Duration::hours(24))
        );
        assert_eq!(schedule.next_reveal_after(t0() + Duration::hours(72), &revealed), None);
    }

    proptest! {
        #[test]
        fn prop_schedule_is_total_and_ordered(
            slot_count in 1usize..40,
            duration_hours in 1i64..200,
        ) {
            let end = t0() + Duration::hours(duration_hours);
            let schedule = RevealSchedule::new(&RevealPolicy::default(), t0(), end, slot_count);

            let slots: BTreeSet<usize> = schedule.events().iter().map(|e| e.slot).collect();
            prop_assert_eq!(schedule.events().len(), slot_count);
            prop_assert_eq!(slots, (1..=slot_count).collect::<BTreeSet<_>>());

            for pair in schedule.events().windows(2) {
                prop_assert!(pair[0].at <= pair[1].at);
            }
            prop_assert!(schedule.events().iter().all(|e| e.at >= t0() && e.at <= end));
        }

        #[test]
        fn prop_due_count_is_monotonic(
            slot_count in 1usize..40,
            a in 0i64..100,
            b in 0i64..100,
        ) {
            let schedule = reference(slot_count);
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            let early_due = schedule.due_at(t0() + Duration::hours(early)).len();
            let late_due = schedule.due_at(t0() + Duration::hours(late)).len();
            prop_assert!(early_due <= late_due);
            if late >= 72 {
                prop_assert_eq!(late_due, slot_count);
            }
        }
    }
}
