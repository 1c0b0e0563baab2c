//! Locally originated sessions
//!
//! [`OwnAnnouncements`] is the set of sessions we announce, keyed by SDP
//! identity. [`OwnAnnouncements::announce_to_port`] runs one loop per
//! session:
//!
//! ```text
//!   announce ──► ┌─ sleep(ad_interval) ──► announce again ─┐
//!                ├─ content changed ─────► retract old, ───┤
//!                │                         announce new    │
//!                └─ deleted / shutdown ──► retract, done   │
//!                ▲                                         │
//!                └─────────────────────────────────────────┘
//! ```

use std::net::IpAddr;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cleanup::{lock, Cleanup, Release};
use crate::dynamic_set::{DynamicSet, WaitFuture};
use crate::error::{Error, Result};
use crate::sdp::Sdp;

use super::hasher::Hasher;
use super::packet::Packet;
use super::port::Port;

/// A session we announce, with its message identification hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnAnnouncement {
    pub sdp: Sdp,
    pub hash: u16,
}

/// Set of locally originated sessions
pub struct OwnAnnouncements {
    set: DynamicSet<String, OwnAnnouncement>,
    hasher: Mutex<Hasher>,
}

impl OwnAnnouncements {
    pub fn new() -> Self {
        Self::with_hasher(Hasher::new())
    }

    /// Use a specific (for example seeded) hasher
    pub fn with_hasher(hasher: Hasher) -> Self {
        Self {
            set: DynamicSet::new(),
            hasher: Mutex::new(hasher),
        }
    }

    pub fn set(&self) -> &DynamicSet<String, OwnAnnouncement> {
        &self.set
    }

    /// Start announcing `sdp`
    ///
    /// Byte-identical content that is already announced is rejected. New
    /// content for an already announced session replaces it.
    pub fn add(&self, sdp: Sdp) -> Result<()> {
        let id = sdp.id().to_string();
        let existing = self.set.get(&id);

        if let Some(existing) = &existing {
            if existing.sdp == sdp {
                return Err(Error::DuplicatePayload(id));
            }
        }

        let hash = {
            let mut hasher = lock(&self.hasher);
            let hash = hasher.hash(sdp.as_bytes())?;
            if let Some(existing) = &existing {
                hasher.expire(existing.sdp.as_bytes());
            }
            hash
        };

        let announcement = OwnAnnouncement { sdp, hash };
        match existing {
            Some(_) => {
                tracing::debug!(session = %id, hash, "Replacing own announcement");
                self.set.update(id, announcement)?;
            }
            None => {
                tracing::debug!(session = %id, hash, "Adding own announcement");
                self.set.add(id, announcement)?;
            }
        }
        Ok(())
    }

    /// Stop announcing the session `sdp` belongs to
    pub fn delete(&self, sdp: &Sdp) -> Result<()> {
        let removed = self.set.delete(&sdp.id().to_string())?;
        lock(&self.hasher).expire(removed.sdp.as_bytes());
        tracing::debug!(session = %sdp.id(), hash = removed.hash, "Removed own announcement");
        Ok(())
    }

    /// Whether a session with the same identity as `sdp` is announced
    pub fn contains(&self, sdp: &Sdp) -> bool {
        self.set.has(&sdp.id().to_string())
    }

    /// Announce every current and future session on `port`
    ///
    /// Each session is announced right away and then every `ad_interval`.
    /// When it is deleted, or the returned handle is cancelled, exactly one
    /// deletion packet is sent for it.
    pub fn announce_to_port<P: Port>(&self, port: Arc<P>, ad_interval: Duration) -> AnnounceHandle {
        let shutdown = CancellationToken::new();
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let set = self.set.clone();
        let token = shutdown.clone();
        let spawned = Arc::clone(&tasks);
        let cleanup = self.set.for_each_async(move |id, _| {
            // Arm the watcher before reading, so a replacement landing
            // before the loop first runs is still seen
            let change: WaitFuture<OwnAnnouncement> = Box::pin(set.wait_for_change(id));
            let current = set.get(id)?;

            let stop = token.child_token();
            let task = tokio::spawn(announce_loop(
                Arc::clone(&port),
                set.clone(),
                id.clone(),
                current,
                change,
                ad_interval,
                stop.clone(),
            ));

            let mut tasks = lock(&spawned);
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);

            Some(Release::action(move || stop.cancel()))
        });

        AnnounceHandle {
            shutdown,
            cleanup,
            tasks,
        }
    }
}

impl Default for OwnAnnouncements {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for OwnAnnouncements {
    type Target = DynamicSet<String, OwnAnnouncement>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

/// Handle to a running [`OwnAnnouncements::announce_to_port`]
pub struct AnnounceHandle {
    shutdown: CancellationToken,
    cleanup: Cleanup,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AnnounceHandle {
    /// Stop announcing; every session gets its final deletion packet
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.cleanup.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel and wait until every deletion packet has been sent
    pub async fn shutdown(&self) {
        self.cancel();
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Announce loop ended abnormally");
            }
        }
    }
}

/// Source address to put in our packets
///
/// The origin address of the SDP if it is IPv4, the port's interface
/// otherwise.
fn packet_source<P: Port>(port: &P, sdp: &Sdp) -> IpAddr {
    match sdp.origin_addr() {
        Some(addr @ IpAddr::V4(_)) => addr,
        _ => IpAddr::V4(port.interface_addr()),
    }
}

async fn send<P: Port>(port: &P, packet: Packet, session: &str) {
    let bytes = match packet.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(session, error = %e, "Cannot encode own announcement");
            return;
        }
    };

    let kind = if packet.deletion { "retraction" } else { "announcement" };
    match port.send(bytes).await {
        Ok(()) => tracing::debug!(session, hash = packet.hash, kind, "Sent"),
        Err(e) => tracing::warn!(session, hash = packet.hash, kind, error = %e, "Send failed"),
    }
}

async fn announce_loop<P: Port>(
    port: Arc<P>,
    set: DynamicSet<String, OwnAnnouncement>,
    id: String,
    mut current: OwnAnnouncement,
    mut change: WaitFuture<OwnAnnouncement>,
    ad_interval: Duration,
    stop: CancellationToken,
) {
    let announce = |a: &OwnAnnouncement| Packet::announcement(packet_source(&*port, &a.sdp), a.hash, &a.sdp);
    let retract = |a: &OwnAnnouncement| Packet::retraction(packet_source(&*port, &a.sdp), a.hash, &a.sdp);

    send(&*port, announce(&current), &id).await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(ad_interval) => {
                send(&*port, announce(&current), &id).await;
            }
            result = &mut change => {
                if result.is_err() {
                    break;
                }
                // Take the latest content; several updates may have landed
                let Some(latest) = set.get(&id) else {
                    break;
                };
                change = Box::pin(set.wait_for_change(&id));
                if latest != current {
                    send(&*port, retract(&current), &id).await;
                    current = latest;
                    send(&*port, announce(&current), &id).await;
                }
            }
        }
    }

    send(&*port, retract(&current), &id).await;
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::sap::constants::AD_INTERVAL;
    use crate::sap::port::MemoryPort;
    use crate::sdp::tests::example;

    use super::*;

    fn sdp(session: u32, name: &str) -> Sdp {
        Sdp::parse(example(session, name)).unwrap()
    }

    fn own() -> OwnAnnouncements {
        OwnAnnouncements::with_hasher(Hasher::with_seed(11))
    }

    fn port() -> Arc<MemoryPort> {
        Arc::new(MemoryPort::new(Ipv4Addr::new(10, 0, 0, 2)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn test_byte_identical_add_is_rejected() {
        let own = own();
        own.add(sdp(1, "a")).unwrap();

        assert!(matches!(own.add(sdp(1, "a")), Err(Error::DuplicatePayload(_))));
        assert_eq!(own.len(), 1);
    }

    #[test]
    fn test_new_content_replaces_session() {
        let own = own();
        own.add(sdp(1, "a")).unwrap();
        let first = own.get(&sdp(1, "a").id().to_string()).unwrap();

        own.add(sdp(1, "b")).unwrap();
        let second = own.get(&sdp(1, "b").id().to_string()).unwrap();

        assert_eq!(own.len(), 1);
        assert_eq!(second.sdp, sdp(1, "b"));
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn test_delete_frees_hash() {
        let own = own();
        own.add(sdp(1, "a")).unwrap();
        own.delete(&sdp(1, "a")).unwrap();

        assert!(own.is_empty());
        assert!(lock(&own.hasher).is_empty());
        assert!(own.delete(&sdp(1, "a")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_announces_periodically_then_retracts_once() {
        let own = own();
        let port = port();
        let session = sdp(1, "a");
        own.add(session.clone()).unwrap();

        let handle = own.announce_to_port(Arc::clone(&port), AD_INTERVAL);
        settle().await;

        let first = port.take_sent();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_announcement());
        assert_eq!(first[0].source, IpAddr::from([192, 168, 1, 1]));

        tokio::time::sleep(AD_INTERVAL * 2).await;
        let repeats = port.take_sent();
        assert_eq!(repeats.len(), 2);
        assert!(repeats.iter().all(|p| *p == first[0]));

        own.delete(&session).unwrap();
        settle().await;
        handle.shutdown().await;
        tokio::time::sleep(AD_INTERVAL * 3).await;

        let last = port.take_sent();
        assert_eq!(last.len(), 1);
        assert!(!last[0].is_announcement());
        assert_eq!(last[0].hash, first[0].hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_retracts_every_session_once() {
        let own = own();
        let port = port();
        own.add(sdp(1, "a")).unwrap();

        let handle = own.announce_to_port(Arc::clone(&port), AD_INTERVAL);
        own.add(sdp(2, "b")).unwrap();
        settle().await;

        handle.shutdown().await;
        // deleting afterwards must not produce another retraction
        own.delete(&sdp(1, "a")).unwrap();
        tokio::time::sleep(AD_INTERVAL * 3).await;

        let sent = port.take_sent();
        let retractions: Vec<&Packet> = sent.iter().filter(|p| p.deletion).collect();
        assert_eq!(sent.len() - retractions.len(), 2);
        assert_eq!(retractions.len(), 2);
        assert_ne!(retractions[0].hash, retractions[1].hash);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_retracts_old_content() {
        let own = own();
        let port = port();
        own.add(sdp(1, "a")).unwrap();
        let handle = own.announce_to_port(Arc::clone(&port), AD_INTERVAL);
        settle().await;
        let old = port.take_sent().remove(0);

        own.add(sdp(1, "b")).unwrap();
        settle().await;

        let sent = port.take_sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].deletion);
        assert_eq!(sent[0].hash, old.hash);
        assert!(sent[1].is_announcement());
        assert_eq!(sent[1].sdp().unwrap(), sdp(1, "b"));

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_before_loop_starts_is_announced() {
        let own = own();
        let port = port();
        own.add(sdp(1, "a")).unwrap();
        let handle = own.announce_to_port(Arc::clone(&port), AD_INTERVAL);
        // no yield: the loop has not run yet
        own.add(sdp(1, "b")).unwrap();

        tokio::time::sleep(AD_INTERVAL * 2).await;
        settle().await;

        let stored = own.get(&sdp(1, "b").id().to_string()).unwrap();
        let sent = port.take_sent();
        assert_eq!(sent.len(), 5);

        assert!(sent[0].is_announcement());
        assert_eq!(sent[0].sdp().unwrap(), sdp(1, "a"));
        assert!(sent[1].deletion);
        assert_eq!(sent[1].hash, sent[0].hash);
        for packet in &sent[2..] {
            assert!(packet.is_announcement());
            assert_eq!(packet.hash, stored.hash);
            assert_eq!(packet.sdp().unwrap(), sdp(1, "b"));
        }

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interface_address_for_hostname_origin() {
        let own = own();
        let port = port();
        let session = Sdp::parse("v=0\r\no=- 5 5 IN IP4 studio.local\r\ns=x\r\n").unwrap();
        own.add(session).unwrap();

        let handle = own.announce_to_port(Arc::clone(&port), AD_INTERVAL);
        settle().await;

        assert_eq!(port.sent_packets()[0].source, IpAddr::from([10, 0, 0, 2]));
        handle.shutdown().await;
    }
}
