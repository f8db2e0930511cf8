//! Plane geometry and timestamp arithmetic shared by the clamp detector,
//! validator, and monitor loop.

use chrono::{DateTime, Utc};

/// A point on the warehouse floor plan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Euclidean distance between two floor-plan coordinates.
pub fn distance(a: Coord, b: Coord) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Seconds elapsed between two timestamps, `later - earlier`. Negative if
/// `later` precedes `earlier`.
pub fn delta_seconds(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn distance_is_euclidean() {
        let a = Coord::new(0.0, 0.0);
        let b = Coord::new(3.0, 4.0);
        assert!((distance(a, b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn distance_zero_for_same_point() {
        let a = Coord::new(12.5, -3.0);
        assert_eq!(distance(a, a), 0.0);
    }

    #[test]
    fn delta_seconds_sub_second_precision() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(1500);
        assert!((delta_seconds(t0, t1) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn delta_seconds_negative_when_reversed() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(5);
        assert!((delta_seconds(t1, t0) + 5.0).abs() < 1e-9);
    }
}
