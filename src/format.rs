//! Display formatting for live metrics.

/// Placeholder shown when there is no pace to display.
pub const PACE_PLACEHOLDER: &str = "--:--";

/// `HH:MM:SS`. Negative or non-finite durations format as zero.
///
/// ```
/// use activity_recorder::format::format_duration;
///
/// assert_eq!(format_duration(3725.4), "01:02:05");
/// ```
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// `M:SS/km`, or [`PACE_PLACEHOLDER`] when there is no pace.
pub fn format_pace(pace_min_per_km: Option<f64>) -> String {
    match pace_min_per_km {
        Some(pace) if pace.is_finite() && pace > 0.0 => {
            let total_seconds = (pace * 60.0).round() as u64;
            format!("{}:{:02}/km", total_seconds / 60, total_seconds % 60)
        }
        _ => PACE_PLACEHOLDER.to_string(),
    }
}

/// Speed in km/h with one decimal.
pub fn format_speed_kmh(speed_mps: f64) -> String {
    let kmh = if speed_mps.is_finite() && speed_mps > 0.0 {
        speed_mps * 3.6
    } else {
        0.0
    };
    format!("{:.1} km/h", kmh)
}

/// Distance in kilometers with two decimals.
pub fn format_distance_km(meters: f64) -> String {
    let km = if meters.is_finite() && meters > 0.0 {
        meters / 1000.0
    } else {
        0.0
    };
    format!("{:.2} km", km)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(59.9), "00:00:59");
        assert_eq!(format_duration(36_000.0), "10:00:00");
        assert_eq!(format_duration(-5.0), "00:00:00");
        assert_eq!(format_duration(f64::NAN), "00:00:00");
    }

    #[test]
    fn test_format_pace() {
        assert_eq!(format_pace(Some(5.5)), "5:30/km");
        assert_eq!(format_pace(Some(4.999)), "5:00/km");
        assert_eq!(format_pace(None), PACE_PLACEHOLDER);
        assert_eq!(format_pace(Some(f64::INFINITY)), PACE_PLACEHOLDER);
    }

    #[test]
    fn test_format_speed_and_distance() {
        assert_eq!(format_speed_kmh(2.5), "9.0 km/h");
        assert_eq!(format_speed_kmh(-1.0), "0.0 km/h");
        assert_eq!(format_distance_km(1500.0), "1.50 km");
    }
}
