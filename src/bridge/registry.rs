//! SAP sessions to registry
//!
//! Every live session is published to the registry, re-published when its
//! SDP changes and withdrawn when it goes away.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cleanup::{Cleanup, Release};
use crate::dynamic_set::{DynamicSet, SetExtra, WaitFuture};
use crate::sdp::Sdp;

/// Registry collaborator
pub trait Registry: Send + Sync + 'static {
    type Error: fmt::Display + Send;

    /// Create or replace the resource for session `id`
    fn publish(&self, id: &str, sdp: &Sdp) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove the resource for session `id`
    fn withdraw(&self, id: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Mirror `sessions` into `registry`
///
/// Closing the returned handle withdraws everything that was published.
/// Registry failures are logged and do not stop the bridge.
pub fn announce_to_registry<R, E>(sessions: &DynamicSet<String, Sdp, E>, registry: Arc<R>) -> Cleanup
where
    R: Registry,
    E: SetExtra,
{
    let shutdown = CancellationToken::new();

    let set = sessions.clone();
    let token = shutdown.clone();
    let cleanup = sessions.for_each_async(move |id, _| {
        // Armed here, not in the task, so no update slips past it
        let change: WaitFuture<Sdp> = Box::pin(set.wait_for_change(id));
        let sdp = set.get(id)?;

        let stop = token.child_token();
        tokio::spawn(publish_loop(
            Arc::clone(&registry),
            set.clone(),
            id.clone(),
            sdp,
            change,
            stop.clone(),
        ));
        Some(Release::action(move || stop.cancel()))
    });

    cleanup.add(move || shutdown.cancel());
    cleanup
}

async fn publish_loop<R, E>(
    registry: Arc<R>,
    set: DynamicSet<String, Sdp, E>,
    id: String,
    mut sdp: Sdp,
    mut change: WaitFuture<Sdp>,
    stop: CancellationToken,
) where
    R: Registry,
    E: SetExtra,
{
    publish(&*registry, &id, &sdp).await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            result = &mut change => {
                if result.is_err() {
                    break;
                }
                change = Box::pin(set.wait_for_change(&id));
                match set.get(&id) {
                    Some(latest) if latest != sdp => {
                        sdp = latest;
                        publish(&*registry, &id, &sdp).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    tracing::info!(session = %id, "Withdrawing session from registry");
    if let Err(e) = registry.withdraw(&id).await {
        tracing::warn!(session = %id, error = %e, "Registry withdraw failed");
    }
}

async fn publish<R: Registry>(registry: &R, id: &str, sdp: &Sdp) {
    tracing::info!(session = %id, "Publishing session to registry");
    if let Err(e) = registry.publish(id, sdp).await {
        tracing::warn!(session = %id, error = %e, "Registry publish failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::cleanup::lock;
    use crate::sdp::tests::example;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Publish(String, String),
        Withdraw(String),
    }

    #[derive(Default)]
    struct MockRegistry {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    impl MockRegistry {
        fn calls(&self) -> Vec<Call> {
            lock(&self.calls).clone()
        }
    }

    impl Registry for MockRegistry {
        type Error = String;

        async fn publish(&self, id: &str, sdp: &Sdp) -> Result<(), String> {
            let name = sdp.name().map_err(|e| e.to_string())?.to_string();
            lock(&self.calls).push(Call::Publish(id.to_string(), name));
            if self.fail {
                return Err("registry unavailable".into());
            }
            Ok(())
        }

        async fn withdraw(&self, id: &str) -> Result<(), String> {
            lock(&self.calls).push(Call::Withdraw(id.to_string()));
            Ok(())
        }
    }

    fn sdp(session: u32, name: &str) -> Sdp {
        Sdp::parse(example(session, name)).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_update_withdraw() {
        let sessions: DynamicSet<String, Sdp> = DynamicSet::new();
        let registry = Arc::new(MockRegistry::default());

        sessions.add("a".into(), sdp(1, "first")).unwrap();
        let cleanup = announce_to_registry(&sessions, Arc::clone(&registry));
        settle().await;

        sessions.update("a".into(), sdp(1, "second")).unwrap();
        settle().await;

        sessions.delete(&"a".to_string()).unwrap();
        settle().await;

        assert_eq!(
            registry.calls(),
            vec![
                Call::Publish("a".into(), "first".into()),
                Call::Publish("a".into(), "second".into()),
                Call::Withdraw("a".into()),
            ]
        );
        cleanup.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_right_after_add_is_published() {
        let sessions: DynamicSet<String, Sdp> = DynamicSet::new();
        let registry = Arc::new(MockRegistry::default());
        let _cleanup = announce_to_registry(&sessions, Arc::clone(&registry));

        sessions.add("a".into(), sdp(1, "first")).unwrap();
        sessions.update("a".into(), sdp(1, "second")).unwrap();
        settle().await;

        assert_eq!(
            registry.calls().last(),
            Some(&Call::Publish("a".into(), "second".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_withdraws_everything() {
        let sessions: DynamicSet<String, Sdp> = DynamicSet::new();
        let registry = Arc::new(MockRegistry::default());

        let cleanup = announce_to_registry(&sessions, Arc::clone(&registry));
        sessions.add("a".into(), sdp(1, "a")).unwrap();
        sessions.add("b".into(), sdp(2, "b")).unwrap();
        settle().await;

        cleanup.close();
        settle().await;

        let mut withdrawn: Vec<Call> = registry
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Withdraw(_)))
            .collect();
        withdrawn.sort_by_key(|c| format!("{:?}", c));
        assert_eq!(withdrawn, vec![Call::Withdraw("a".into()), Call::Withdraw("b".into())]);

        // no longer following the set
        sessions.add("c".into(), sdp(3, "c")).unwrap();
        settle().await;
        assert_eq!(registry.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_do_not_stop_bridge() {
        let sessions: DynamicSet<String, Sdp> = DynamicSet::new();
        let registry = Arc::new(MockRegistry {
            fail: true,
            ..Default::default()
        });

        let _cleanup = announce_to_registry(&sessions, Arc::clone(&registry));
        sessions.add("a".into(), sdp(1, "a")).unwrap();
        settle().await;
        sessions.update("a".into(), sdp(1, "b")).unwrap();
        settle().await;

        assert_eq!(registry.calls().len(), 2);
    }
}
