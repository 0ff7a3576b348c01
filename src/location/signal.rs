//! GPS signal grading.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LocationConfig;

/// Quality of the location signal.
///
/// `Good`, `Acceptable` and `Poor` are graded from the accuracy of the latest
/// fix; `Acquired` is set when a recovery probe succeeds. `Lost` and `Denied`
/// persist until a new accuracy reading or an explicit re-acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsSignalState {
    #[default]
    Initializing,
    Searching,
    Acquired,
    Good,
    Acceptable,
    Poor,
    Lost,
    Denied,
}

impl GpsSignalState {
    /// Grade an accuracy reading. A missing reading means the sensor failed.
    pub fn from_accuracy(accuracy_m: Option<f64>, config: &LocationConfig) -> Self {
        match accuracy_m {
            Some(a) if a.is_finite() && a <= config.good_accuracy_m => GpsSignalState::Good,
            Some(a) if a.is_finite() && a <= config.acceptable_accuracy_m => {
                GpsSignalState::Acceptable
            }
            Some(a) if a.is_finite() => GpsSignalState::Poor,
            _ => GpsSignalState::Lost,
        }
    }

    /// Whether a session may start with this signal.
    pub fn allows_start(self) -> bool {
        matches!(
            self,
            GpsSignalState::Acquired
                | GpsSignalState::Good
                | GpsSignalState::Acceptable
                | GpsSignalState::Poor
        )
    }

    pub fn is_degraded(self) -> bool {
        matches!(self, GpsSignalState::Lost | GpsSignalState::Denied)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GpsSignalState::Initializing => "initializing",
            GpsSignalState::Searching => "searching",
            GpsSignalState::Acquired => "acquired",
            GpsSignalState::Good => "good",
            GpsSignalState::Acceptable => "acceptable",
            GpsSignalState::Poor => "poor",
            GpsSignalState::Lost => "lost",
            GpsSignalState::Denied => "denied",
        }
    }
}

impl fmt::Display for GpsSignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_grading() {
        let config = LocationConfig::default();
        assert_eq!(GpsSignalState::from_accuracy(Some(5.0), &config), GpsSignalState::Good);
        assert_eq!(GpsSignalState::from_accuracy(Some(50.0), &config), GpsSignalState::Good);
        assert_eq!(
            GpsSignalState::from_accuracy(Some(50.1), &config),
            GpsSignalState::Acceptable
        );
        assert_eq!(
            GpsSignalState::from_accuracy(Some(250.0), &config),
            GpsSignalState::Acceptable
        );
        assert_eq!(GpsSignalState::from_accuracy(Some(900.0), &config), GpsSignalState::Poor);
        assert_eq!(GpsSignalState::from_accuracy(None, &config), GpsSignalState::Lost);
        assert_eq!(
            GpsSignalState::from_accuracy(Some(f64::NAN), &config),
            GpsSignalState::Lost
        );
    }

    #[test]
    fn test_start_gate() {
        for s in [
            GpsSignalState::Initializing,
            GpsSignalState::Searching,
            GpsSignalState::Lost,
            GpsSignalState::Denied,
        ] {
            assert!(!s.allows_start(), "{s} should block start");
        }
        for s in [
            GpsSignalState::Acquired,
            GpsSignalState::Good,
            GpsSignalState::Acceptable,
            GpsSignalState::Poor,
        ] {
            assert!(s.allows_start(), "{s} should allow start");
        }
    }
}
