//! Hourly accounting windows, aligned to the top of each UTC hour.

use chrono::{DateTime, Duration, DurationRound, Utc};

/// Length of one accounting window.
pub fn window_length() -> Duration {
    Duration::hours(1)
}

/// The start of the window containing `now`.
pub fn current_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(window_length()).unwrap_or(now)
}

/// The next top-of-hour boundary strictly after `now`.
pub fn next_top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    current_window_start(now) + window_length()
}

/// Time left until the next boundary, as a std duration suitable for sleeping.
pub fn until_next_window(now: DateTime<Utc>) -> std::time::Duration {
    (next_top_of_hour(now) - now)
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn mid_hour_rounds_up() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 25, 30).unwrap();
        assert_eq!(
            next_top_of_hour(now),
            Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap()
        );
        assert_eq!(
            until_next_window(now),
            std::time::Duration::from_secs(34 * 60 + 30)
        );
    }

    #[test]
    fn exact_boundary_waits_a_full_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(current_window_start(now), now);
        assert_eq!(until_next_window(now), std::time::Duration::from_secs(3600));
    }

    #[test]
    fn crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            next_top_of_hour(now),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
