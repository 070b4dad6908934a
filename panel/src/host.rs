//! Host side of the sync loop.
//!
//! The host answers every `ping` with one `pong` carrying worker liveness and
//! the review link, and turns every `request_save` into a save whose outcome
//! comes back as `save_result`. Handlers hold only a weak reference to the
//! coordinator so dropping it detaches the host from the bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::core::message::{Payload, Ping, Pong, RequestSave, SaveResult};
use crate::io::supervisor::Supervisor;
use crate::reconcile::Reconciler;

struct HostInner {
    bus: MessageBus,
    supervisor: Option<Supervisor>,
    reconciler: Arc<Reconciler>,
    poll_outstanding: AtomicBool,
    last_review_link: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct HostCoordinator {
    inner: Arc<HostInner>,
}

impl HostCoordinator {
    /// `supervisor` is `None` when no worker could be configured; liveness is
    /// then always reported as down.
    pub fn new(bus: MessageBus, supervisor: Option<Supervisor>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                bus,
                supervisor,
                reconciler,
                poll_outstanding: AtomicBool::new(false),
                last_review_link: Mutex::new(None),
            }),
        }
    }

    /// Register the `ping` and `request_save` handlers on the host bus.
    pub fn attach(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.register(move |_: Ping| {
            if let Some(host) = upgrade(&weak) {
                host.on_ping();
            }
        });
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.register(move |request: RequestSave| {
            if let Some(host) = upgrade(&weak) {
                host.on_request_save(request);
            }
        });
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn supervisor(&self) -> Option<&Supervisor> {
        self.inner.supervisor.as_ref()
    }

    pub fn server_active(&self) -> bool {
        self.inner
            .supervisor
            .as_ref()
            .is_some_and(Supervisor::is_running)
    }

    /// Gather one status answer: liveness first, then repository status.
    ///
    /// An unreadable branch keeps the previously reported review link.
    pub async fn status(&self) -> Pong {
        let server_active = self.server_active();
        let status = self.inner.reconciler.current_status().await;
        let mut last = self
            .inner
            .last_review_link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if status.branch.is_some() {
            last.clone_from(&status.review_link);
        } else {
            debug!("branch unknown, keeping previous review link");
        }
        Pong {
            server_active,
            review_link: last.clone(),
        }
    }

    fn on_ping(&self) {
        if self.inner.poll_outstanding.swap(true, Ordering::SeqCst) {
            debug!("ping coalesced into outstanding poll");
            return;
        }
        let host = self.clone();
        tokio::spawn(async move {
            let pong = host.status().await;
            host.inner.poll_outstanding.store(false, Ordering::SeqCst);
            host.inner.bus.post(pong.into_message());
        });
    }

    fn on_request_save(&self, request: RequestSave) {
        let host = self.clone();
        tokio::spawn(async move {
            info!("save requested");
            let outcome = host.inner.reconciler.save(&request.commit_message).await;
            host.inner
                .bus
                .post(SaveResult { ok: outcome.ok() }.into_message());
        });
    }
}

fn upgrade(weak: &Weak<HostInner>) -> Option<HostCoordinator> {
    match weak.upgrade() {
        Some(inner) => Some(HostCoordinator { inner }),
        None => {
            debug!("host coordinator dropped, ignoring message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Outbound;
    use crate::cancel::CancellationToken;
    use crate::core::message::Message;
    use crate::test_support::{FakeVcs, StaticReviewLookup};
    use std::time::Duration;

    fn host(vcs: Arc<FakeVcs>, reviews: StaticReviewLookup) -> (HostCoordinator, Outbound) {
        let (bus, out) = MessageBus::new("host");
        let reconciler = Arc::new(Reconciler::new(vcs, Arc::new(reviews), "updates"));
        let host = HostCoordinator::new(bus, None, reconciler);
        host.attach();
        (host, out)
    }

    async fn next_message(out: &mut Outbound) -> Message {
        let frame = tokio::time::timeout(Duration::from_secs(5), out.recv())
            .await
            .expect("timely reply")
            .expect("open queue");
        Message::decode(&frame).expect("decode")
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let vcs = Arc::new(FakeVcs::on_branch("updates"));
        let (host, mut out) = host(vcs, StaticReviewLookup::link("https://example.test/pr/9"));
        host.bus().dispatch(r#"{"kind":"ping"}"#).expect("dispatch");

        assert_eq!(
            next_message(&mut out).await,
            Message::Pong(Pong {
                server_active: false,
                review_link: Some("https://example.test/pr/9".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn request_save_is_answered_with_result() {
        let vcs = Arc::new(FakeVcs::on_branch("master").dirty());
        let (host, mut out) = host(vcs.clone(), StaticReviewLookup::none());
        host.bus()
            .dispatch(r#"{"kind":"request_save","payload":{"commit_message":"new landing copy"}}"#)
            .expect("dispatch");

        assert_eq!(
            next_message(&mut out).await,
            Message::SaveResult(SaveResult { ok: true })
        );
        assert_eq!(vcs.snapshot().pushed.len(), 1);

        host.bus()
            .dispatch(r#"{"kind":"request_save","payload":{"commit_message":"again"}}"#)
            .expect("dispatch");
        assert_eq!(
            next_message(&mut out).await,
            Message::SaveResult(SaveResult { ok: false })
        );
    }

    #[tokio::test]
    async fn pings_during_outstanding_poll_are_coalesced() {
        let vcs = Arc::new(FakeVcs::on_branch("master").dirty());
        let gate = vcs.hold_pushes();
        let (host, mut out) = host(vcs, StaticReviewLookup::none());

        host.bus()
            .dispatch(r#"{"kind":"request_save","payload":{"commit_message":"slow save"}}"#)
            .expect("dispatch");
        gate.wait_entered().await;
        for _ in 0..3 {
            host.bus().dispatch(r#"{"kind":"ping"}"#).expect("dispatch");
        }
        gate.release();

        let mut kinds = vec![next_message(&mut out).await.kind(), next_message(&mut out).await.kind()];
        kinds.sort_by_key(|kind| kind.tag());
        assert_eq!(
            kinds,
            vec![
                crate::core::message::MessageKind::Pong,
                crate::core::message::MessageKind::SaveResult
            ]
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(out.try_recv().is_none());
    }

    #[tokio::test]
    async fn unreadable_branch_keeps_previous_link() {
        let vcs = Arc::new(FakeVcs::on_branch("updates"));
        let (host, _out) = host(vcs.clone(), StaticReviewLookup::link("https://example.test/pr/2"));
        assert!(host.status().await.review_link.is_some());

        vcs.update(|state| state.current = None);
        assert_eq!(
            host.status().await.review_link.as_deref(),
            Some("https://example.test/pr/2")
        );

        vcs.update(|state| state.current = Some("master".to_string()));
        assert_eq!(host.status().await.review_link, None);
    }

    #[tokio::test]
    async fn liveness_follows_supervisor() {
        let (bus, _out) = MessageBus::new("host");
        let vcs = Arc::new(FakeVcs::on_branch("master"));
        let reconciler = Arc::new(Reconciler::new(vcs, Arc::new(StaticReviewLookup::none()), "updates"));
        let supervisor = Supervisor::new(
            vec!["sleep".to_string(), "30".to_string()],
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let host = HostCoordinator::new(bus, Some(supervisor.clone()), reconciler);
        assert!(!host.server_active());

        supervisor.start();
        let mut running = false;
        for _ in 0..250 {
            if host.server_active() {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(running);

        supervisor.stop().await;
        assert!(!host.status().await.server_active);
    }

    #[tokio::test]
    async fn dropped_coordinator_ignores_messages() {
        let vcs = Arc::new(FakeVcs::on_branch("updates"));
        let (host, mut out) = host(vcs, StaticReviewLookup::none());
        let bus = host.bus().clone();
        drop(host);

        bus.dispatch(r#"{"kind":"ping"}"#).expect("still registered");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(out.try_recv().is_none());
    }
}
