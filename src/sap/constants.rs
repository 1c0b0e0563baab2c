//! SAP protocol constants (RFC 2974)

use std::net::Ipv4Addr;
use std::time::Duration;

/// Well-known SAP UDP port
pub const SAP_PORT: u16 = 9875;

/// Administratively scoped global SAP group (239.255.255.255)
pub const SAP_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 255);

/// Interval between repeated announcements of one session
pub const AD_INTERVAL: Duration = Duration::from_secs(30);

/// Announcements a session may miss before it is considered gone
pub const NO_OF_ADS: u32 = 10;

/// Silence after which a remote session expires
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * NO_OF_ADS as u64);

/// Protocol version carried in the top three flag bits
pub const SAP_VERSION: u8 = 1;

// Flag bits of the first header byte; 0x08 is reserved and ignored
pub const FLAG_ADDRESS_TYPE: u8 = 0x10;
pub const FLAG_MESSAGE_TYPE: u8 = 0x04;
pub const FLAG_ENCRYPTED: u8 = 0x02;
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Flags, auth length and message identification hash
pub const FIXED_HEADER_SIZE: usize = 4;

/// Auth length is a byte counting 32-bit words
pub const MAX_AUTH_LEN: usize = 255 * 4;

/// Largest datagram the port will read
pub const MAX_PACKET_SIZE: usize = 65_535;
