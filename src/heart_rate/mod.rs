//! Heart-rate sensor sessions.
//!
//! The transport delivers raw notification frames; [`frames`] decodes them,
//! [`link`] runs the connection as a cancellable task, and
//! [`HeartRateSession`] holds connection state, battery, the rolling history
//! and zone aggregates.

pub mod frames;
pub mod link;
mod session;
mod transport;
mod zones;

pub use link::{spawn_link, LinkEvent};
pub use session::{HeartRateChange, HeartRateConnectionState, HeartRateSession};
pub use transport::{DeviceFilter, HeartRateTransport};
pub use zones::{HRZoneConfig, HRZoneDistribution, ZoneTally};
