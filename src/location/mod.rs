//! GPS sampling.
//!
//! - [`LocationProvider`]: the platform seam (permission, single fix, watch)
//! - [`GeoSampler`]: normalization, retry budget, watch task, recovery probe
//! - [`GpsSignalState`]: accuracy grading

mod provider;
mod sampler;
mod signal;

pub use provider::{LocationOptions, LocationProvider, PermissionStatus, RawFix};
pub use sampler::{GeoSampler, WatchHandle};
pub use signal::GpsSignalState;
