//! HTTP transport for a UI peer talking to `panel-host`.
//!
//! Outbound frames are POSTed to `/api/messages`; inbound frames arrive on the
//! `/events` server-sent-event stream as events named `message`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::bus::{MessageBus, Outbound};
use crate::cancel::CancellationToken;

/// SSE event name carrying one bus frame.
pub const MESSAGE_EVENT: &str = "message";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fails unless the host answers its health check.
    pub async fn health(&self) -> Result<()> {
        self.client
            .get(self.url("/api/health"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .with_context(|| format!("reach host at {}", self.base_url))?
            .error_for_status()
            .context("host health check")?;
        Ok(())
    }

    /// Deliver one frame to the host bus.
    pub async fn send(&self, frame: &str) -> Result<()> {
        self.client
            .post(self.url("/api/messages"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(frame.to_string())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .context("post message to host")?
            .error_for_status()
            .context("host rejected message")?;
        Ok(())
    }

    /// Forward every posted frame, in order, until the UI bus is dropped or
    /// `cancel` fires. Delivery failures are logged and the frame is dropped.
    pub async fn forward(&self, mut outbound: Outbound, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = outbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if let Err(err) = self.send(&frame).await {
                warn!(err = %format!("{err:#}"), "failed to deliver message");
            }
        }
        debug!("outbound forwarding stopped");
    }

    /// Attach to the host's event stream.
    ///
    /// Returns once the host has accepted this view, so frames posted after
    /// this call are answered on the returned stream.
    pub async fn open_events(&self) -> Result<EventStream> {
        let response = self
            .client
            .get(self.url("/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .context("open event stream")?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            bail!("another view is already attached to this host");
        }
        let response = response.error_for_status().context("open event stream")?;
        Ok(EventStream { response })
    }
}

/// An accepted `/events` subscription.
#[derive(Debug)]
pub struct EventStream {
    response: reqwest::Response,
}

impl EventStream {
    /// Dispatch every `message` event into `bus` until the host closes the
    /// stream or `cancel` fires.
    pub async fn listen(self, bus: &MessageBus, cancel: &CancellationToken) -> Result<()> {
        let mut stream = self.response.bytes_stream();
        let mut decoder = SseDecoder::default();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                debug!("event stream closed by host");
                return Ok(());
            };
            let chunk = chunk.context("read event stream")?;
            for event in decoder.push(&chunk) {
                if event.name == MESSAGE_EVENT {
                    // Rejections are logged by dispatch.
                    let _ = bus.dispatch(&event.data);
                } else {
                    debug!(event = %event.name, "ignoring event");
                }
            }
        }
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    name: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let name = self.name.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent {
                name: name.unwrap_or_else(|| MESSAGE_EVENT.to_string()),
                data,
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.name = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}
