//! Speed-weighted scoring for correct answers.

/// Points awarded for an instant correct answer when nothing else is configured.
pub const DEFAULT_MAX_POINTS: u64 = 1000;

/// Linear speed bonus: an instant correct answer earns `max_points`, an answer
/// submitted exactly at the time limit earns half of it (rounded up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringPolicy {
    max_points: u64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl ScoringPolicy {
    /// Build a policy awarding at most `max_points` (clamped to at least 1).
    pub fn new(max_points: u64) -> Self {
        Self {
            max_points: max_points.max(1),
        }
    }

    /// Upper bound of a single award.
    pub fn max_points(&self) -> u64 {
        self.max_points
    }

    /// Points for one answer. Callers reject `elapsed_ms > limit_ms` beforehand;
    /// larger values are clamped to the limit.
    pub fn award(&self, correct: bool, elapsed_ms: u64, limit_ms: u64) -> u64 {
        if !correct {
            return 0;
        }
        if limit_ms == 0 {
            return self.max_points;
        }

        let elapsed = u128::from(elapsed_ms.min(limit_ms));
        let max = u128::from(self.max_points);
        let penalty = max * elapsed / (2 * u128::from(limit_ms));

        (max - penalty) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incorrect_answer_awards_nothing() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.award(false, 0, 10_000), 0);
        assert_eq!(policy.award(false, 9_999, 10_000), 0);
    }

    #[test]
    fn instant_answer_awards_max() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.award(true, 0, 10_000), DEFAULT_MAX_POINTS);
    }

    #[test]
    fn answer_at_limit_awards_half() {
        let policy = ScoringPolicy::new(1000);
        assert_eq!(policy.award(true, 10_000, 10_000), 500);

        let odd = ScoringPolicy::new(999);
        assert_eq!(odd.award(true, 10_000, 10_000), 500);
    }

    #[test]
    fn award_is_non_increasing_and_positive() {
        let policy = ScoringPolicy::new(1000);
        let limit = 20_000;
        let mut previous = u64::MAX;
        for elapsed in (0..=limit).step_by(250) {
            let points = policy.award(true, elapsed, limit);
            assert!(points > 0);
            assert!(points <= policy.max_points());
            assert!(points <= previous, "award increased at {elapsed}ms");
            previous = points;
        }
    }

    #[test]
    fn zero_max_points_is_clamped() {
        let policy = ScoringPolicy::new(0);
        assert_eq!(policy.award(true, 5, 10), 1);
    }
}
