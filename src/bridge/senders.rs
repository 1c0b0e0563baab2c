//! Registry senders to SAP
//!
//! Every RTP sender's manifest is fetched, parsed as SDP and added to an
//! [`OwnAnnouncements`] set. The manifest is fetched again whenever the
//! sender changes. A sender that disappears, or stops being RTP, takes its
//! announcement with it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cleanup::{Cleanup, Release};
use crate::dynamic_set::{DynamicSet, SetExtra, SetValue, WaitFuture};
use crate::sap::OwnAnnouncements;
use crate::sdp::Sdp;

/// Transport URN prefix of RTP senders
pub const RTP_TRANSPORT_PREFIX: &str = "urn:x-nmos:transport:rtp";

/// A sender known to the registry
pub trait SenderSource {
    type Error: fmt::Display + Send;

    /// Transport URN, for example `urn:x-nmos:transport:rtp.mcast`
    fn transport(&self) -> &str;

    /// Fetch the sender's SDP manifest
    fn fetch_manifest(&self) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn is_rtp(&self) -> bool {
        self.transport().starts_with(RTP_TRANSPORT_PREFIX)
    }
}

/// Announce every RTP sender in `senders` through `own`
///
/// Closing the returned handle removes every announcement it added.
pub fn announce_senders<S, E>(senders: &DynamicSet<String, S, E>, own: Arc<OwnAnnouncements>) -> Cleanup
where
    S: SenderSource + SetValue,
    E: SetExtra,
{
    let shutdown = CancellationToken::new();

    let set = senders.clone();
    let token = shutdown.clone();
    let cleanup = senders.for_each_async(move |id, _| {
        // Armed here, not in the task, so no update slips past it
        let change: WaitFuture<S> = Box::pin(set.wait_for_change(id));
        let sender = set.get(id)?;
        tracing::debug!(sender = %id, transport = sender.transport(), "Found sender");

        let stop = token.child_token();
        tokio::spawn(follow_sender(
            Arc::clone(&own),
            set.clone(),
            id.clone(),
            sender,
            change,
            stop.clone(),
        ));
        Some(Release::action(move || stop.cancel()))
    });

    cleanup.add(move || shutdown.cancel());
    cleanup
}

async fn follow_sender<S, E>(
    own: Arc<OwnAnnouncements>,
    set: DynamicSet<String, S, E>,
    id: String,
    mut sender: S,
    mut change: WaitFuture<S>,
    stop: CancellationToken,
) where
    S: SenderSource + SetValue,
    E: SetExtra,
{
    let mut current: Option<Sdp> = None;

    loop {
        if sender.is_rtp() {
            let fetched = tokio::select! {
                _ = stop.cancelled() => break,
                fetched = fetch_sdp(&sender) => fetched,
            };
            match fetched {
                Ok(sdp) => replace(&own, &mut current, Some(sdp)),
                Err(e) => tracing::warn!(sender = %id, error = %e, "Failed to fetch sender manifest"),
            }
        } else {
            replace(&own, &mut current, None);
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            result = &mut change => {
                if result.is_err() {
                    break;
                }
                change = Box::pin(set.wait_for_change(&id));
                match set.get(&id) {
                    Some(latest) => sender = latest,
                    None => break,
                }
            }
        }
    }

    replace(&own, &mut current, None);
}

async fn fetch_sdp<S: SenderSource>(sender: &S) -> Result<Sdp, String> {
    let manifest = sender.fetch_manifest().await.map_err(|e| e.to_string())?;
    Sdp::parse(manifest).map_err(|e| e.to_string())
}

/// Swap the announcement held for one sender
fn replace(own: &OwnAnnouncements, current: &mut Option<Sdp>, next: Option<Sdp>) {
    if *current == next {
        return;
    }

    if let Some(old) = current.take() {
        let same_session = next.as_ref().is_some_and(|n| n.id() == old.id());
        if !same_session {
            if let Err(e) = own.delete(&old) {
                tracing::debug!(session = %old.id(), error = %e, "Announcement already gone");
            }
        }
    }

    if let Some(sdp) = next {
        match own.add(sdp.clone()) {
            Ok(()) => {
                tracing::info!(session = %sdp.id(), "Announcing sender");
                *current = Some(sdp);
            }
            Err(e) => tracing::warn!(session = %sdp.id(), error = %e, "Failed to announce sender"),
        }
    }
}
