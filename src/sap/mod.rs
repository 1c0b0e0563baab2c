//! Session Announcement Protocol engine
//!
//! Inbound, a [`Port`] decodes datagrams and [`Announcements`] turns them
//! into a live set of remote sessions. Outbound, [`OwnAnnouncements`] holds
//! the sessions we originate and repeats them on the port until they are
//! removed.
//!
//! # Architecture
//!
//! ```text
//!            UDP 239.255.255.255:9875
//!                       │
//!                       ▼
//!               ┌───────────────┐  broadcast   ┌───────────────┐
//!               │    UdpPort    │─────────────►│ Announcements │──► DynamicSet<id, Sdp>
//!               │  (or Memory)  │  PortEvent   │ timeout 300 s │
//!               └───────────────┘              └───────┬───────┘
//!                       ▲                              │ ignore_from
//!                       │ announce / retract           ▼
//!               ┌───────┴──────────┐           ┌──────────────────┐
//!               │ announce_to_port │◄──────────│ OwnAnnouncements │
//!               │ one loop/session │           │ + Hasher         │
//!               └──────────────────┘           └──────────────────┘
//! ```

pub mod announcements;
pub mod config;
pub mod constants;
pub mod hasher;
pub mod own;
pub mod packet;
pub mod port;

pub use announcements::{Announcements, SessionNotice};
pub use config::SapConfig;
pub use hasher::Hasher;
pub use own::{AnnounceHandle, OwnAnnouncement, OwnAnnouncements};
pub use packet::Packet;
pub use port::{MemoryPort, Port, PortEvent, UdpPort};
