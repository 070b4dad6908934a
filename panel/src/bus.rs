//! Typed message bus between the host and the UI view.
//!
//! Each side owns one [`MessageBus`]. Posting encodes a [`Message`] into a JSON
//! frame and queues it on the side's [`Outbound`] queue; whatever transport
//! connects the two sides (SSE + HTTP in `panel-host`, [`pump`] in-process)
//! drains that queue in order and hands frames to the peer's
//! [`MessageBus::dispatch`]. Dispatch routes by kind to the single registered
//! handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::core::message::{Message, MessageKind, Payload, peek_tag};

type Handler = Arc<dyn Fn(Message) + Send + Sync>;

/// Why an inbound frame was not delivered to a handler.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown message kind '{0}'")]
    UnknownKind(String),
    #[error("no handler registered for '{0}'")]
    Unhandled(MessageKind),
    #[error("invalid '{kind}' payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Frames posted by one side, in posting order, waiting for the transport.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Outbound {
    /// Next frame; `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

struct BusInner {
    side: &'static str,
    outbox: mpsc::UnboundedSender<String>,
    handlers: Mutex<HashMap<MessageKind, Handler>>,
}

/// One side of the host/UI channel. Clones share handlers and the outbound queue.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus for `side` (used in logs) and the queue its posts land in.
    pub fn new(side: &'static str) -> (Self, Outbound) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let bus = Self {
            inner: Arc::new(BusInner {
                side,
                outbox,
                handlers: Mutex::new(HashMap::new()),
            }),
        };
        (bus, Outbound { rx })
    }

    pub fn side(&self) -> &'static str {
        self.inner.side
    }

    /// Queue `message` for the peer. Never blocks.
    ///
    /// If the transport is gone the frame is dropped and logged.
    pub fn post(&self, message: Message) {
        let kind = message.kind();
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(side = self.inner.side, %kind, err = %err, "failed to encode message");
                return;
            }
        };
        if self.inner.outbox.send(frame).is_err() {
            debug!(side = self.inner.side, %kind, "transport detached, dropping message");
            return;
        }
        trace!(side = self.inner.side, %kind, "message posted");
    }

    /// Install the handler for payload type `P`, replacing any previous one.
    pub fn register<P, F>(&self, handler: F)
    where
        P: Payload,
        F: Fn(P) + Send + Sync + 'static,
    {
        let side = self.inner.side;
        let wrapped: Handler = Arc::new(move |message: Message| match P::from_message(message) {
            Some(payload) => handler(payload),
            None => warn!(side, kind = %P::KIND, "handler received a foreign message kind"),
        });
        if self.lock_handlers().insert(P::KIND, wrapped).is_some() {
            debug!(side, kind = %P::KIND, "replaced message handler");
        }
    }

    /// Decode one inbound frame and run its handler.
    ///
    /// Every failure is logged and returned; none of them panic.
    pub fn dispatch(&self, raw: &str) -> Result<MessageKind, BusError> {
        let result = self.route(raw);
        match &result {
            Ok(kind) => trace!(side = self.inner.side, %kind, "message dispatched"),
            Err(err) => warn!(side = self.inner.side, err = %err, "inbound message rejected"),
        }
        result
    }

    fn route(&self, raw: &str) -> Result<MessageKind, BusError> {
        let tag = peek_tag(raw).map_err(BusError::Malformed)?;
        let kind = MessageKind::from_tag(&tag).ok_or(BusError::UnknownKind(tag))?;
        let handler = self
            .lock_handlers()
            .get(&kind)
            .cloned()
            .ok_or(BusError::Unhandled(kind))?;
        let message =
            Message::decode(raw).map_err(|source| BusError::Payload { kind, source })?;
        handler(message);
        Ok(kind)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, HashMap<MessageKind, Handler>> {
        match self.inner.handlers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Deliver every frame from `outbound` to `peer`, in order, until the sending
/// side is dropped. In-process transport used by tests and embedded views.
pub fn pump(mut outbound: Outbound, peer: MessageBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            // Rejections are already logged by dispatch.
            let _ = peer.dispatch(&frame);
        }
        debug!(side = peer.side(), "transport closed");
    })
}
