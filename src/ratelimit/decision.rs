//! The admission decision.
//!
//! Every call evaluates two independent gates against the bucket state:
//!
//! 1. a concurrency gate (`ops_tokens`): is any slot free at all?
//! 2. a throughput gate (`ops_capacity`): has the current interval's budget
//!    been spent?
//!
//! When both pass the caller is admitted immediately. Otherwise the wait
//! cursor reserves a place in a future interval and the caller is told how
//! long to wait for it. No timers are involved; all refill is computed from
//! the elapsed interval count when a bucket is touched.

use std::cmp::Ordering;

use super::bucket::{BucketPolicy, BucketState};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A slot was taken; the caller may run now and must release it later.
    Admitted,
    /// A slot is free but the current interval's throughput is spent.
    AwaitingCapacity,
    /// Every slot is in use.
    AwaitingSlot,
}

/// Result of [`decide`]: the state to persist and the delay to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub state: BucketState,
    pub delay_ms: u64,
    pub outcome: Outcome,
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        self.outcome == Outcome::Admitted
    }
}

/// Decide whether an operation arriving at `now` may run.
///
/// `now` must not go backwards between calls for the same bucket. Earlier
/// timestamps are handled best-effort: elapsed interval counts clamp at zero
/// and the reported delay is still never negative.
pub fn decide(policy: &BucketPolicy, mut state: BucketState, now: i64) -> Decision {
    let interval = policy.interval;

    if state.has_slot() {
        if interval.index(now) > interval.index(state.ops_last) {
            let refill = policy
                .refresh_rate
                .saturating_mul(interval.elapsed(state.ops_last, now));
            state.ops_capacity = policy.size.min(state.ops_capacity.saturating_add(refill));
            state.ops_last = now;
            return admit(state);
        }

        if state.ops_capacity > 0 {
            return admit(state);
        }

        schedule_wait(policy, &mut state, now);
        return waiting(state, now, Outcome::AwaitingCapacity);
    }

    look_ahead_for_slot(policy, &mut state, now);
    waiting(state, now, Outcome::AwaitingSlot)
}

fn admit(mut state: BucketState) -> Decision {
    state.ops_capacity -= 1;
    state.ops_tokens -= 1;
    Decision {
        state,
        delay_ms: 0,
        outcome: Outcome::Admitted,
    }
}

fn waiting(state: BucketState, now: i64, outcome: Outcome) -> Decision {
    // wait_last is always ahead of now on the waiting paths.
    let delay_ms = u64::try_from(state.wait_last.saturating_sub(now)).unwrap_or(0);
    Decision {
        state,
        delay_ms,
        outcome,
    }
}

/// Move the wait cursor to the first boundary after `from` with a full
/// interval's budget.
fn advance_wait(policy: &BucketPolicy, state: &mut BucketState, from: i64) {
    state.wait_last = policy.interval.next_boundary(from);
    state.wait_capacity = policy.refresh_rate;
}

/// Reserve a future interval for a caller that holds a slot but found the
/// current interval's throughput spent.
fn schedule_wait(policy: &BucketPolicy, state: &mut BucketState, now: i64) {
    let interval = policy.interval;

    match interval.index(now).cmp(&interval.index(state.wait_last)) {
        // Stale cursor: nothing is queued, the next boundary is free.
        Ordering::Greater => advance_wait(policy, state, now),
        // The cursor sits in the spent interval. Carry its leftover one
        // boundary forward, skipping ahead again if nothing is left.
        Ordering::Equal => {
            state.wait_last = interval.next_boundary(state.wait_last);
            if state.wait_capacity <= 0 {
                let from = state.wait_last;
                advance_wait(policy, state, from);
            }
        }
        // A reservation already exists in a later interval.
        Ordering::Less => {
            if state.wait_capacity <= 0 {
                let from = state.wait_last;
                advance_wait(policy, state, from);
            }
        }
    }

    state.wait_capacity -= 1;
}

/// Reserve a retry time for a caller that found every slot in use.
fn look_ahead_for_slot(policy: &BucketPolicy, state: &mut BucketState, now: i64) {
    let interval = policy.interval;

    if now < state.wait_last {
        if state.wait_capacity <= 0 {
            let from = state.wait_last;
            advance_wait(policy, state, from);
        }
    } else {
        let next = now.saturating_add(policy.wait_for_token_ms);

        // Refill from whichever cursor moved last.
        let (base, since) = if state.ops_last >= state.wait_last {
            (state.ops_capacity, state.ops_last)
        } else {
            (state.wait_capacity, state.wait_last)
        };
        let refill = policy
            .refresh_rate
            .saturating_mul(interval.elapsed(since, next));
        let capacity = policy.size.min(base.saturating_add(refill));

        if capacity > 0 {
            state.wait_last = next;
            state.wait_capacity = capacity;
        } else {
            advance_wait(policy, state, next);
        }
    }

    state.wait_capacity -= 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::interval::RefreshInterval;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn policy(size: i64, refresh_rate: i64, interval_ms: i64, wait_for_token_ms: i64) -> BucketPolicy {
        BucketPolicy {
            size,
            refresh_rate,
            interval: RefreshInterval::from_millis(interval_ms),
            wait_for_token_ms,
        }
    }

    fn state(
        ops_tokens: i64,
        ops_last: i64,
        ops_capacity: i64,
        wait_last: i64,
        wait_capacity: i64,
    ) -> BucketState {
        BucketState {
            ops_tokens,
            ops_last,
            ops_capacity,
            wait_last,
            wait_capacity,
        }
    }

    #[test]
    fn test_new_interval_refills_and_admits() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 2, 0, 0), 3500);

        assert!(decision.is_admitted());
        assert_eq!(decision.delay_ms, 0);
        assert_eq!(decision.state, state(4, 3500, 7, 0, 0));
    }

    #[test]
    fn test_refill_is_capped_at_size() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 9, 0, 0), 3500);

        assert_eq!(decision.state.ops_capacity, 9);
    }

    #[test]
    fn test_same_interval_with_budget_admits_without_moving_cursor() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 2, 0, 0), 1500);

        assert!(decision.is_admitted());
        assert_eq!(decision.state, state(4, 1000, 1, 0, 0));
    }

    #[test]
    fn test_stale_wait_cursor_moves_to_next_boundary() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 0, 0, -2), 1500);

        assert_eq!(decision.outcome, Outcome::AwaitingCapacity);
        assert_eq!(decision.delay_ms, 500);
        assert_eq!(decision.state, state(5, 1000, 0, 2000, 2));
    }

    #[test]
    fn test_current_wait_cursor_carries_leftover() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 0, 1000, 2), 1500);

        assert_eq!(decision.delay_ms, 500);
        assert_eq!(decision.state, state(5, 1000, 0, 2000, 1));
    }

    #[test]
    fn test_current_wait_cursor_without_leftover_skips_an_interval() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 0, 1000, 0), 1500);

        assert_eq!(decision.delay_ms, 1500);
        assert_eq!(decision.state, state(5, 1000, 0, 3000, 2));
    }

    #[test]
    fn test_future_reservation_with_room_is_shared() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 0, 4000, 1), 1500);

        assert_eq!(decision.delay_ms, 2500);
        assert_eq!(decision.state, state(5, 1000, 0, 4000, 0));
    }

    #[test]
    fn test_full_future_reservation_moves_one_interval() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(5, 1000, 0, 4000, 0), 1500);

        assert_eq!(decision.delay_ms, 3500);
        assert_eq!(decision.state, state(5, 1000, 0, 5000, 2));
    }

    #[test]
    fn test_no_slot_joins_live_reservation() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(0, 1000, 3, 2000, 2), 1500);

        assert_eq!(decision.outcome, Outcome::AwaitingSlot);
        assert_eq!(decision.delay_ms, 500);
        assert_eq!(decision.state, state(0, 1000, 3, 2000, 1));
    }

    #[test]
    fn test_no_slot_full_reservation_moves_one_interval() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(0, 1000, 3, 2000, 0), 1500);

        assert_eq!(decision.delay_ms, 1500);
        assert_eq!(decision.state, state(0, 1000, 3, 3000, 2));
    }

    #[test]
    fn test_no_slot_lookahead_refills_from_ops_cursor() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(0, 1000, 1, 0, 0), 1980);

        assert_eq!(decision.delay_ms, 50);
        assert_eq!(decision.state, state(0, 1000, 1, 2030, 3));
    }

    #[test]
    fn test_no_slot_lookahead_refills_from_wait_cursor() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(0, 1000, 5, 1200, -4), 2980);

        assert_eq!(decision.delay_ms, 50);
        assert_eq!(decision.state, state(0, 1000, 5, 3030, 1));
    }

    #[test]
    fn test_no_slot_lookahead_without_capacity_moves_past_it() {
        let p = policy(10, 3, 1000, 50);
        let decision = decide(&p, state(0, 1000, 5, 1200, 0), 1300);

        assert_eq!(decision.delay_ms, 700);
        assert_eq!(decision.state, state(0, 1000, 5, 2000, 2));
    }

    #[test]
    fn test_out_of_order_time_never_reports_negative_delay() {
        let p = policy(10, 3, 1000, 50);

        let with_slot = decide(&p, state(5, 4000, 0, 5000, 1), 1500);
        assert!(with_slot.delay_ms > 0);

        let without_slot = decide(&p, state(0, 4000, 0, 3000, 0), 1500);
        assert!(without_slot.delay_ms > 0);
    }

    /// Replays random traffic with releases, returning (time, decision) pairs.
    fn random_run(seed: u64, p: &BucketPolicy, start: i64) -> Vec<(i64, Decision)> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut bucket = BucketState::initial(p, start);
        let mut outstanding = 0;
        let mut now = start;
        let mut log = Vec::new();

        for _ in 0..500 {
            now += rng.gen_range(0..400);
            let decision = decide(p, bucket, now);
            if decision.is_admitted() {
                outstanding += 1;
            }
            bucket = decision.state.clone();
            log.push((now, decision));

            if outstanding > 0 && rng.gen_bool(0.4) {
                bucket.ops_tokens += 1;
                outstanding -= 1;
            }
        }
        log
    }

    #[test]
    fn test_waiting_decisions_always_report_positive_delay() {
        let p = policy(10, 3, 1000, 50);
        for seed in 0..20 {
            for (_, decision) in random_run(seed, &p, 0) {
                if !decision.is_admitted() {
                    assert!(decision.delay_ms > 0, "seed {}: {:?}", seed, decision);
                }
            }
        }
    }

    #[test]
    fn test_admissions_per_interval_never_exceed_size() {
        let p = policy(5, 3, 1000, 50);
        for seed in 0..20 {
            let mut per_interval = std::collections::HashMap::new();
            for (now, decision) in random_run(seed, &p, 250) {
                if decision.is_admitted() {
                    *per_interval.entry(p.interval.index(now)).or_insert(0) += 1;
                }
            }
            for (index, count) in per_interval {
                assert!(count <= p.size, "seed {}: {} admissions in interval {}", seed, count, index);
            }
        }
    }

    #[test]
    fn test_admissions_in_any_window_never_exceed_twice_size() {
        // A sliding window straddles at most two aligned intervals, so
        // returned tokens can let through up to 2x size across one.
        let p = policy(5, 3, 1000, 50);
        for seed in 0..20 {
            let admitted: Vec<i64> = random_run(seed, &p, 250)
                .into_iter()
                .filter(|(_, decision)| decision.is_admitted())
                .map(|(now, _)| now)
                .collect();
            for &start in &admitted {
                let end = start + p.interval.width_ms();
                let count = admitted.iter().filter(|&&t| t >= start && t < end).count() as i64;
                assert!(count <= 2 * p.size, "seed {}: {} admissions after {}", seed, count, start);
            }
        }
    }

    #[test]
    fn test_identical_inputs_give_identical_outputs() {
        let p = policy(10, 3, 1000, 50);
        assert_eq!(random_run(7, &p, 0), random_run(7, &p, 0));
    }

    #[test]
    fn test_first_decision_depends_on_elapsed_boundary() {
        let p = policy(10, 3, 3000, 50);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let start = rng.gen_range(0..100_000);
            let now = start + rng.gen_range(0..6000);
            let decision = decide(&p, BucketState::initial(&p, start), now);

            if p.interval.index(now) > p.interval.index(start) {
                assert_eq!(decision.delay_ms, 0);
            } else {
                assert!(decision.delay_ms > 0);
                assert!(decision.delay_ms <= p.interval.width_ms() as u64);
            }
        }
    }
}
