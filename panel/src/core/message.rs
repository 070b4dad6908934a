//! Wire messages exchanged between the host and the UI view.
//!
//! Every frame is a JSON envelope `{"kind": <tag>, "payload": {...}}`. The
//! [`Message`] sum type is the single source of truth for the tag/payload
//! pairing: a frame cannot carry a payload shape that does not belong to its
//! kind.

use serde::{Deserialize, Serialize};

/// Discriminant of a [`Message`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// UI asks the host for a status snapshot.
    Ping,
    /// Host answers a [`MessageKind::Ping`].
    Pong,
    /// UI asks the host to publish the pending changes.
    RequestSave,
    /// Host reports how a save ended.
    SaveResult,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::RequestSave,
        MessageKind::SaveResult,
    ];

    /// Tag written to the `kind` field of the envelope.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::RequestSave => "request_save",
            MessageKind::SaveResult => "save_result",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Status request. Carries no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping;

/// Consolidated host status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub server_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSave {
    pub commit_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub ok: bool,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Ping,
    Pong(Pong),
    RequestSave(RequestSave),
    SaveResult(SaveResult),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Ping => MessageKind::Ping,
            Message::Pong(_) => MessageKind::Pong,
            Message::RequestSave(_) => MessageKind::RequestSave,
            Message::SaveResult(_) => MessageKind::SaveResult,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Reads only the `kind` field of a frame, leaving the payload untouched.
pub fn peek_tag(raw: &str) -> serde_json::Result<String> {
    #[derive(Deserialize)]
    struct Envelope {
        kind: String,
    }
    let envelope: Envelope = serde_json::from_str(raw)?;
    Ok(envelope.kind)
}

/// Typed payload of one message kind.
///
/// Lets handlers be registered against the payload type instead of matching on
/// [`Message`] themselves.
pub trait Payload: Sized + Send + 'static {
    const KIND: MessageKind;

    fn into_message(self) -> Message;

    /// Extract the payload; `None` if `message` is of another kind.
    fn from_message(message: Message) -> Option<Self>;
}

impl Payload for Ping {
    const KIND: MessageKind = MessageKind::Ping;

    fn into_message(self) -> Message {
        Message::Ping
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Ping => Some(Ping),
            _ => None,
        }
    }
}

impl Payload for Pong {
    const KIND: MessageKind = MessageKind::Pong;

    fn into_message(self) -> Message {
        Message::Pong(self)
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Pong(pong) => Some(pong),
            _ => None,
        }
    }
}

impl Payload for RequestSave {
    const KIND: MessageKind = MessageKind::RequestSave;

    fn into_message(self) -> Message {
        Message::RequestSave(self)
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::RequestSave(request) => Some(request),
            _ => None,
        }
    }
}

impl Payload for SaveResult {
    const KIND: MessageKind = MessageKind::SaveResult;

    fn into_message(self) -> Message {
        Message::SaveResult(self)
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::SaveResult(result) => Some(result),
            _ => None,
        }
    }
}
