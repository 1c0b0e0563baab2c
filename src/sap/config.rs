//! SAP port and session configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::constants::*;

/// SAP configuration options
#[derive(Debug, Clone)]
pub struct SapConfig {
    /// Address the port binds to
    pub bind_addr: SocketAddr,

    /// Multicast group to join and announce to
    pub multicast_group: Ipv4Addr,

    /// Local interface for group membership and outgoing packets
    pub interface: Ipv4Addr,

    /// Interval between repeated announcements
    pub ad_interval: Duration,

    /// Missed announcements before a remote session expires
    pub no_of_ads: u32,

    /// Depth of the port's event channel
    pub event_capacity: usize,

    /// Deliver our own multicast packets back to us
    pub multicast_loop: bool,
}

impl Default for SapConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), SAP_PORT),
            multicast_group: SAP_MULTICAST_GROUP,
            interface: Ipv4Addr::UNSPECIFIED,
            ad_interval: AD_INTERVAL,
            no_of_ads: NO_OF_ADS,
            event_capacity: 1024,
            multicast_loop: true,
        }
    }
}

impl SapConfig {
    /// Create a config bound to a specific interface
    pub fn with_interface(interface: Ipv4Addr) -> Self {
        Self {
            interface,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the multicast group
    pub fn multicast_group(mut self, group: Ipv4Addr) -> Self {
        self.multicast_group = group;
        self
    }

    /// Set the interface
    pub fn interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Set the announcement interval
    pub fn ad_interval(mut self, interval: Duration) -> Self {
        self.ad_interval = interval;
        self
    }

    /// Set how many announcements may be missed
    pub fn no_of_ads(mut self, count: u32) -> Self {
        self.no_of_ads = count.max(1);
        self
    }

    /// Set the event channel depth
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Disable multicast loopback
    pub fn disable_multicast_loop(mut self) -> Self {
        self.multicast_loop = false;
        self
    }

    /// Silence after which a remote session expires
    pub fn session_timeout(&self) -> Duration {
        self.ad_interval * self.no_of_ads
    }

    /// Where outgoing packets are sent
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.multicast_group.into(), self.bind_addr.port())
    }
}
