//! UI side of the sync loop.
//!
//! A [`UiSession`] polls the host with `ping` on a fixed interval, folds every
//! `pong` and `save_result` into a [`UiState`] and publishes it on a watch
//! channel for whatever renders it. Save indicators clear themselves after a
//! short delay; a newer indicator change invalidates older clear timers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::cancel::CancellationToken;
use crate::core::message::{Message, Payload, Pong, RequestSave, SaveResult};
use crate::core::ui_state::{SaveRejected, UiState, check_commit_message};
use crate::io::config::UiConfig;

/// Timing and form settings of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiSettings {
    pub poll_interval: Duration,
    pub indicator_clear: Duration,
    pub min_commit_message_len: usize,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self::from(&UiConfig::default())
    }
}

impl From<&UiConfig> for UiSettings {
    fn from(cfg: &UiConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            indicator_clear: cfg.indicator_clear(),
            min_commit_message_len: cfg.min_commit_message_len,
        }
    }
}

struct UiInner {
    bus: MessageBus,
    settings: UiSettings,
    state: watch::Sender<UiState>,
}

#[derive(Clone)]
pub struct UiSession {
    inner: Arc<UiInner>,
}

impl UiSession {
    pub fn new(bus: MessageBus, settings: UiSettings) -> Self {
        let (state, _) = watch::channel(UiState::default());
        Self {
            inner: Arc::new(UiInner {
                bus,
                settings,
                state,
            }),
        }
    }

    /// Register the `pong` and `save_result` handlers on the UI bus.
    pub fn attach(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.register(move |pong: Pong| {
            if let Some(inner) = weak.upgrade() {
                UiSession { inner }.on_pong(pong);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.register(move |result: SaveResult| {
            if let Some(inner) = weak.upgrade() {
                UiSession { inner }.on_save_result(result);
            }
        });
    }

    pub fn state(&self) -> UiState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.inner.state.subscribe()
    }

    /// Ask the host for a status update.
    pub fn poll(&self) {
        self.inner.bus.post(Message::Ping);
    }

    /// Poll every `poll_interval` (first poll immediately) until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll(),
            }
        }
        debug!("ui poll loop stopped");
    }

    /// Send a save request if the form gate allows it.
    pub fn request_save(&self, commit_message: &str) -> Result<(), SaveRejected> {
        check_commit_message(commit_message, self.inner.settings.min_commit_message_len)?;

        let mut begun = Err(SaveRejected::InFlight);
        self.inner.state.send_if_modified(|state| {
            begun = state.begin_save();
            begun.is_ok()
        });
        let generation = begun?;

        info!("sending save request");
        self.inner.bus.post(
            RequestSave {
                commit_message: commit_message.to_string(),
            }
            .into_message(),
        );
        self.schedule_clear(generation);
        Ok(())
    }

    fn on_pong(&self, pong: Pong) {
        self.inner
            .state
            .send_if_modified(|state| state.apply_pong(&pong));
    }

    fn on_save_result(&self, result: SaveResult) {
        let mut generation = 0;
        self.inner.state.send_modify(|state| {
            generation = state.finish_save(result.ok);
        });
        debug!(ok = result.ok, "save finished");
        self.schedule_clear(generation);
    }

    fn schedule_clear(&self, generation: u64) {
        let weak: Weak<UiInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.indicator_clear;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner
                    .state
                    .send_if_modified(|state| state.clear_indicator(generation));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Outbound;
    use crate::core::message::peek_tag;
    use crate::core::ui_state::{SaveIndicator, ServerIndicator};

    fn session() -> (UiSession, Outbound) {
        let (bus, out) = MessageBus::new("ui");
        let session = UiSession::new(bus, UiSettings::default());
        session.attach();
        (session, out)
    }

    fn drain(out: &mut Outbound) -> Vec<String> {
        std::iter::from_fn(|| out.try_recv())
            .map(|frame| peek_tag(&frame).expect("tag"))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_cancelled() {
        let (session, mut out) = session();
        let cancel = CancellationToken::new();
        let poller = {
            let session = session.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { session.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        poller.await.expect("poll loop");

        assert_eq!(drain(&mut out), vec!["ping"; 4]);
    }

    #[tokio::test]
    async fn pong_updates_render_state() {
        let (session, _out) = session();
        let mut rx = session.subscribe();
        session
            .inner
            .bus
            .dispatch(r#"{"kind":"pong","payload":{"server_active":true,"review_link":"https://example.test/pr/5"}}"#)
            .expect("dispatch");

        assert!(rx.has_changed().expect("sender alive"));
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.server, ServerIndicator::Running);
        assert_eq!(state.review_link.as_deref(), Some("https://example.test/pr/5"));
        assert_eq!(
            state.status_line(),
            "Status: running | approve here: https://example.test/pr/5"
        );

        session
            .inner
            .bus
            .dispatch(r#"{"kind":"pong","payload":{"server_active":false}}"#)
            .expect("dispatch");
        let state = session.state();
        assert_eq!(state.server, ServerIndicator::Down);
        assert_eq!(state.review_link, None);
    }

    #[tokio::test]
    async fn short_messages_are_rejected_locally() {
        let (session, mut out) = session();
        assert_eq!(
            session.request_save("   fix    "),
            Err(SaveRejected::TooShort { min: 10, len: 3 })
        );
        assert!(drain(&mut out).is_empty());
        assert_eq!(session.state().save, SaveIndicator::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_save_while_in_flight_is_rejected() {
        let (session, mut out) = session();
        session.request_save("rewrite the intro").expect("first");
        assert_eq!(
            session.request_save("and the outro too"),
            Err(SaveRejected::InFlight)
        );
        assert_eq!(drain(&mut out), vec!["request_save"]);
    }

    #[tokio::test(start_paused = true)]
    async fn save_indicator_clears_after_latest_change() {
        let (session, _out) = session();
        session.request_save("rewrite the intro").expect("request");
        assert_eq!(session.state().save, SaveIndicator::InFlight);

        tokio::time::sleep(Duration::from_millis(500)).await;
        session
            .inner
            .bus
            .dispatch(r#"{"kind":"save_result","payload":{"ok":false}}"#)
            .expect("dispatch");
        assert_eq!(session.state().save, SaveIndicator::Failed);

        // The clear scheduled by the request is stale by now.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(session.state().save, SaveIndicator::Failed);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state().save, SaveIndicator::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_indicator_clears_without_answer() {
        let (session, _out) = session();
        session.request_save("rewrite the intro").expect("request");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(session.state().save, SaveIndicator::Idle);
        session.request_save("rewrite it again").expect("gate reopened");
    }
}
