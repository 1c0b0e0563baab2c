//! Bridging SAP and an HTTP registry
//!
//! ```text
//!   Announcements ──► announce_to_registry ──► Registry::publish / withdraw
//!
//!   PollingSet<senders> ──► announce_senders ──► OwnAnnouncements ──► Port
//! ```
//!
//! The registry itself (discovery, REST calls, resource tree) is supplied by
//! the caller through [`Registry`] and [`SenderSource`]. A sender list is
//! usually a [`PollingSet`](crate::dynamic_set::PollingSet) over the
//! registry's query API.

pub mod registry;
pub mod senders;

pub use registry::{announce_to_registry, Registry};
pub use senders::{announce_senders, SenderSource, RTP_TRANSPORT_PREFIX};
