//! Remote sessions seen on a port
//!
//! Session lifecycle, per SDP identity:
//!
//! ```text
//!                 announce (new)
//!   ┌────────┐ ─────────────────────► ┌──────┐ ◄─┐ announce, same bytes: re-arm timer
//!   │ absent │                        │ live │ ──┘ announce, new bytes: update, re-arm
//!   └────────┘ ◄───────────────────── └──────┘
//!                 retraction (explicit)
//!                 timeout    (expired)
//! ```
//!
//! Every event carries a [`SessionNotice`] naming the packet that caused it,
//! so consumers can tell an explicit retraction from a silent loss.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cleanup::{lock, Cleanup};
use crate::dynamic_set::{DynamicSet, WeakSet};
use crate::sdp::Sdp;

use super::config::SapConfig;
use super::own::{OwnAnnouncement, OwnAnnouncements};
use super::packet::Packet;
use super::port::{Port, PortEvent};

/// Why a session changed
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// An announcement added or changed the session
    Announced(Packet),
    /// A deletion packet removed the session
    Retracted(Packet),
    /// The session timed out; carries its last announcement
    Expired(Packet),
}

impl SessionNotice {
    /// Whether the session was removed on purpose
    pub fn is_explicit(&self) -> bool {
        matches!(self, SessionNotice::Retracted(_))
    }

    pub fn packet(&self) -> &Packet {
        match self {
            SessionNotice::Announced(p) | SessionNotice::Retracted(p) | SessionNotice::Expired(p) => p,
        }
    }
}

type Ignored = Arc<Mutex<Vec<WeakSet<String, OwnAnnouncement>>>>;

/// Live remote sessions, keyed by SDP identity
///
/// Dereferences to the session set. Closing the set stops listening.
pub struct Announcements {
    set: DynamicSet<String, Sdp, SessionNotice>,
    ignored: Ignored,
}

impl Announcements {
    /// Track the sessions announced on `port`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<P: Port>(port: &P, config: &SapConfig) -> Self {
        Self::with_timeout(port, config.session_timeout())
    }

    /// Track sessions, expiring them after `timeout` of silence
    pub fn with_timeout<P: Port>(port: &P, timeout: Duration) -> Self {
        let set = DynamicSet::new();
        let ignored: Ignored = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let stop = Cleanup::new();
        let t = token.clone();
        stop.add(move || t.cancel());
        set.on_close(stop);

        let driver = Driver {
            set: set.downgrade(),
            ignored: Arc::clone(&ignored),
            timeout,
            sessions: HashMap::new(),
        };
        tokio::spawn(driver.run(port.subscribe(), token));

        Self { set, ignored }
    }

    pub fn set(&self) -> &DynamicSet<String, Sdp, SessionNotice> {
        &self.set
    }

    /// Ignore every packet for a session that `own` is announcing
    pub fn ignore_from(&self, own: &OwnAnnouncements) {
        lock(&self.ignored).push(own.set().downgrade());
    }
}

impl Deref for Announcements {
    type Target = DynamicSet<String, Sdp, SessionNotice>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

struct Session {
    deadline: Instant,
    last: Packet,
}

struct Driver {
    set: WeakSet<String, Sdp, SessionNotice>,
    ignored: Ignored,
    timeout: Duration,
    sessions: HashMap<String, Session>,
}

impl Driver {
    async fn run(mut self, mut rx: broadcast::Receiver<PortEvent>, token: CancellationToken) {
        let mut port_open = true;

        loop {
            let next_deadline = self.sessions.values().map(|s| s.deadline).min();

            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv(), if port_open => match event {
                    Ok(PortEvent::Packet(packet)) => self.on_packet(packet),
                    Ok(PortEvent::Error(e)) => {
                        tracing::debug!(error = %e, "Ignoring undecodable packet");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Announcement listener fell behind");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("Port closed; sessions will expire");
                        port_open = false;
                    }
                },
                _ = sleep_until(next_deadline), if next_deadline.is_some() => self.expire(),
            }

            if port_open || !self.sessions.is_empty() {
                continue;
            }
            break;
        }
    }

    fn is_ignored(&self, id: &String) -> bool {
        let mut ignored = lock(&self.ignored);
        ignored.retain(|own| own.upgrade().is_some());
        ignored
            .iter()
            .filter_map(|own| own.upgrade())
            .any(|own| own.has(id))
    }

    fn on_packet(&mut self, packet: Packet) {
        if !packet.has_sdp_payload() {
            tracing::debug!(payload_type = %packet.payload_type, "Ignoring non-SDP packet");
            return;
        }
        let sdp = match packet.sdp() {
            Ok(sdp) => sdp,
            Err(e) => {
                tracing::debug!(source = %packet.source, error = %e, "Ignoring malformed SDP");
                return;
            }
        };
        let id = sdp.id().to_string();
        if self.is_ignored(&id) {
            return;
        }
        let Some(set) = self.set.upgrade() else {
            return;
        };

        if packet.deletion {
            if self.sessions.remove(&id).is_some() {
                tracing::info!(session = %id, source = %packet.source, "Session retracted");
                let _ = set.delete_with(&id, Some(SessionNotice::Retracted(packet)));
            }
            return;
        }

        self.sessions.insert(
            id.clone(),
            Session {
                deadline: Instant::now() + self.timeout,
                last: packet.clone(),
            },
        );

        let result = match set.get(&id) {
            None => {
                tracing::info!(session = %id, source = %packet.source, "Session announced");
                set.add_with(id, sdp, Some(SessionNotice::Announced(packet)))
            }
            Some(prev) if prev == sdp => {
                tracing::trace!(session = %id, "Session refreshed");
                Ok(())
            }
            Some(_) => {
                tracing::info!(session = %id, source = %packet.source, "Session updated");
                set.update_with(id, sdp, Some(SessionNotice::Announced(packet)))
                    .map(|_| ())
            }
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Session change not applied");
        }
    }

    fn expire(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let set = self.set.upgrade();
        for id in expired {
            let Some(session) = self.sessions.remove(&id) else {
                continue;
            };
            tracing::info!(session = %id, "Session timed out");
            if let Some(set) = &set {
                let _ = set.delete_with(&id, Some(SessionNotice::Expired(session.last)));
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
