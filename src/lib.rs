//! SAP announcement engine and reactive keyed collections
//!
//! Two halves that feed each other:
//!
//! - [`dynamic_set`]: observable keyed collections and derived views
//!   (union, filter, map, async filter/map, polling) that stay consistent
//!   with their sources as they change.
//! - [`sap`]: the Session Announcement Protocol (RFC 2974) codec, a
//!   multicast port, the inbound session table with timeouts and the
//!   outbound announcer.
//!
//! [`bridge`] wires both to an HTTP registry supplied by the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sap_rs::sap::{Announcements, OwnAnnouncements, SapConfig, UdpPort};
//! use sap_rs::Sdp;
//!
//! # async fn run(sdp_text: String) -> sap_rs::Result<()> {
//! let config = SapConfig::default();
//! let port = Arc::new(UdpPort::bind(config.clone()).await?);
//!
//! let own = OwnAnnouncements::new();
//! own.add(Sdp::parse(sdp_text)?)?;
//! let handle = own.announce_to_port(Arc::clone(&port), config.ad_interval);
//!
//! let remote = Announcements::new(&*port, &config);
//! remote.ignore_from(&own);
//! remote.subscribe(|event| println!("{:?}", event.kind()));
//!
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cleanup;
pub mod dynamic_set;
pub mod error;
pub mod sap;
pub mod sdp;

pub use cleanup::{Cleanup, Release};
pub use dynamic_set::{DynamicSet, EventKind, SetEvent};
pub use error::{Error, Result};
pub use sdp::Sdp;
