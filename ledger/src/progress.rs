//! Level and streak arithmetic.

use chrono::NaiveDate;

/// Level reached with `total_xp` points: `floor(sqrt(total_xp / 100)) + 1`.
#[must_use]
pub fn level_for_xp(total_xp: u64) -> u32 {
    let level = (total_xp / 100).isqrt() + 1;
    u32::try_from(level).unwrap_or(u32::MAX)
}

/// Experience total at which `level + 1` begins: `level² × 100`.
#[must_use]
pub fn xp_for_next_level(level: u32) -> u64 {
    u64::from(level).pow(2) * 100
}

/// Streak after recording activity on `today`.
///
/// Returns `None` when `today` was already recorded.
#[must_use]
pub fn next_streak(
    last_activity: Option<NaiveDate>,
    today: NaiveDate,
    current: u32,
) -> Option<u32> {
    match last_activity {
        Some(last) if last == today => None,
        Some(last) if last.succ_opt() == Some(today) => Some(current.saturating_add(1)),
        _ => Some(1),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(900), 4);
    }

    #[test]
    fn next_level_thresholds() {
        assert_eq!(xp_for_next_level(1), 100);
        assert_eq!(xp_for_next_level(2), 400);
        assert_eq!(xp_for_next_level(3), 900);
    }

    #[test]
    fn streak_rules() {
        let today = day("2025-06-10");
        assert_eq!(next_streak(None, today, 0), Some(1));
        assert_eq!(next_streak(Some(today), today, 4), None);
        assert_eq!(next_streak(Some(day("2025-06-09")), today, 4), Some(5));
        assert_eq!(next_streak(Some(day("2025-06-07")), today, 4), Some(1));
    }

    #[test]
    fn streak_continues_across_month_end() {
        assert_eq!(next_streak(Some(day("2025-02-28")), day("2025-03-01"), 6), Some(7));
    }

    proptest! {
        #[test]
        fn reaching_next_level_threshold_levels_up(level in 1u32..1_000) {
            prop_assert_eq!(level_for_xp(xp_for_next_level(level)), level + 1);
            prop_assert_eq!(level_for_xp(xp_for_next_level(level) - 1), level);
        }

        #[test]
        fn level_is_monotonic(a in 0u64..10_000_000, b in 0u64..10_000_000) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(level_for_xp(lo) <= level_for_xp(hi));
        }
    }
}
