//! Small helpers shared by the runner and the queue.

/// Progress expressed in base points: 10000 bp = 100%.
pub const MAX_PROGRESS_BASE_POINTS: u32 = 10_000;

/// Exponential backoff in milliseconds, capped at 30 seconds.
///
/// `seed` spreads concurrent callers apart so they do not retry in lockstep.
pub fn calculate_backoff(attempt: u32, seed: u64) -> u64 {
    let base: u64 = 100;
    let exp = attempt.min(8);
    let delay = base.saturating_mul(1u64 << exp);
    let spread = seed % 50;
    delay.saturating_add(spread).min(30_000)
}

/// Convert a percentage to base points, clamped to 0..=10000.
pub fn percent_to_base_points(percent: f64) -> u32 {
    if !percent.is_finite() || percent <= 0.0 {
        return 0;
    }
    let bp = (percent * 100.0).round();
    if bp >= f64::from(MAX_PROGRESS_BASE_POINTS) {
        MAX_PROGRESS_BASE_POINTS
    } else {
        bp as u32
    }
}

/// Convert base points back to a percentage.
pub fn base_points_to_percent(bp: u32) -> f64 {
    f64::from(bp.min(MAX_PROGRESS_BASE_POINTS)) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert!(calculate_backoff(1, 0) < calculate_backoff(3, 0));
        assert_eq!(calculate_backoff(100, 0), 25_600);
        assert!(calculate_backoff(100, 49) <= 30_000);
        assert_eq!(calculate_backoff(1, 7), 207);
        assert_eq!(calculate_backoff(1, 57), 207);
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(percent_to_base_points(12.345), 1235);
        assert_eq!(percent_to_base_points(-3.0), 0);
        assert_eq!(percent_to_base_points(250.0), 10_000);
        assert_eq!(percent_to_base_points(f64::NAN), 0);
        assert_eq!(base_points_to_percent(2550), 25.5);
    }
}
