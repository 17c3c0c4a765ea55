//! Manager configuration.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Configuration consumed by every vendor manager.
///
/// This is the entire external surface the core consumes; everything else
/// (addresses, identities, channel counts) is learned from the devices.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Local interface address to bind multicast membership to. `None`
    /// lets the OS pick.
    pub preferred_nic: Option<Ipv4Addr>,
    /// Interval at which devices are asked to emit metering samples.
    pub meter_interval: Duration,
    /// Period for poll-style loops (subscription renewal checks, scan
    /// dwell time).
    pub polling_period: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            preferred_nic: None,
            meter_interval: Duration::from_millis(50),
            polling_period: Duration::from_millis(100),
        }
    }
}
