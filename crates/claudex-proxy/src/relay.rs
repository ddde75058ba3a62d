//! Upstream relay and SSE re-framing.
//!
//! The upstream streams `chat.completion.chunk` objects as `data: {json}`
//! lines with a terminal `data: [DONE]`. Callers expect Anthropic's event
//! sequence:
//!
//! ```text
//! message_start, content_block_start, content_block_delta*,
//! content_block_stop, message_delta, message_stop
//! ```
//!
//! The opening pair is written before the first upstream read and the closing
//! sequence once at upstream EOF, so the framing holds no matter how the
//! upstream chunks or truncates its output.

use crate::error::ProxyError;
use crate::translation::{to_messages_response, translate_chunk, StreamSignal};
use crate::types::{ChatChunk, ChatCompletion, ChatRequest, MessagesResponse};
use async_stream::stream;
use bytes::{Bytes, BytesMut};
use claudex_auth::secrecy::{ExposeSecret, SecretString};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Counters shared by every stream the process relays.
#[derive(Debug, Default)]
pub struct RelayStats {
    dropped_frames: AtomicU64,
}

impl RelayStats {
    /// Non-blank upstream lines that were neither a chunk nor `[DONE]`.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn record_drop(&self, line: &str) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        debug!(line = %line, "dropped upstream frame");
    }

    fn record_oversized(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        warn!(limit = MAX_PENDING_LINE, "discarded oversized upstream line");
    }
}

#[derive(Clone)]
pub struct Relay {
    client: reqwest::Client,
    upstream_url: String,
    stats: Arc<RelayStats>,
}

impl Relay {
    pub fn new(client: reqwest::Client, upstream_url: impl Into<String>) -> Self {
        Self {
            client,
            upstream_url: upstream_url.into(),
            stats: Arc::new(RelayStats::default()),
        }
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// POST one chat request upstream. Non-success statuses become
    /// [`ProxyError::Upstream`]; the body is logged, not returned.
    pub async fn send(
        &self,
        token: &SecretString,
        req: &ChatRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        let upstream = self
            .client
            .post(&self.upstream_url)
            .bearer_auth(token.expose_secret())
            .json(req)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "upstream request failed");
                ProxyError::Upstream("upstream request failed".to_string())
            })?;

        let status = upstream.status();
        if !status.is_success() {
            let text = upstream.text().await.unwrap_or_default();
            error!(%status, body = %text, "upstream error");
            return Err(ProxyError::Upstream(format!(
                "upstream returned status {}",
                status.as_u16()
            )));
        }

        Ok(upstream)
    }

    /// Buffer a non-streaming response and translate it.
    pub async fn complete(
        &self,
        upstream: reqwest::Response,
        model: &str,
    ) -> Result<MessagesResponse, ProxyError> {
        let body = upstream.bytes().await.map_err(|e| {
            error!(error = %e, "failed to read upstream response");
            ProxyError::Upstream("failed to read upstream response".to_string())
        })?;

        let completion: ChatCompletion = serde_json::from_slice(&body).map_err(|e| {
            error!(error = %e, "failed to decode upstream response");
            ProxyError::Upstream("upstream returned an unparsable response".to_string())
        })?;

        Ok(to_messages_response(completion, new_message_id(), model))
    }

    /// Re-frame a streaming response as Anthropic SSE.
    pub fn stream(
        &self,
        upstream: reqwest::Response,
        model: String,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + 'static {
        translate_stream(upstream.bytes_stream(), model, Arc::clone(&self.stats))
    }
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn sse_event(name: &str, data: &Value) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", name, data))
}

/// Longest unterminated line held between reads.
const MAX_PENDING_LINE: usize = 1024 * 1024;

/// Byte-level line splitter. Holds the trailing partial line between reads so
/// a frame split anywhere (even inside a UTF-8 sequence) decodes once.
///
/// Each byte is scanned once. A partial line that outgrows
/// [`MAX_PENDING_LINE`] is thrown away along with the rest of that line.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    /// Skipping the tail of an oversized line.
    discarding: bool,
    oversized: u64,
}

impl LineBuffer {
    fn push(&mut self, mut bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        if self.discarding {
            match bytes.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    bytes = &bytes[pos + 1..];
                }
                None => return lines,
            }
        }

        self.buf.extend_from_slice(bytes);
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            lines.push(decode_utf8(&line[..line.len() - 1]));
        }
        self.scanned = self.buf.len();

        if self.buf.len() > MAX_PENDING_LINE {
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
            self.oversized += 1;
        }
        lines
    }

    /// Oversized lines discarded since the last call.
    fn take_oversized(&mut self) -> u64 {
        std::mem::take(&mut self.oversized)
    }

    /// The unterminated remainder, if any.
    fn finish(&mut self) -> Option<String> {
        if self.discarding || self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        self.scanned = 0;
        Some(decode_utf8(&rest))
    }
}

fn decode_utf8(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[derive(Debug)]
enum Frame {
    Chunk(ChatChunk),
    Done,
    Blank,
    Dropped,
}

fn decode_line(line: &str) -> Frame {
    if line.trim().is_empty() {
        return Frame::Blank;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return Frame::Dropped;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Frame::Done;
    }
    match serde_json::from_str(data) {
        Ok(chunk) => Frame::Chunk(chunk),
        Err(_) => Frame::Dropped,
    }
}

/// Per-stream translation state between the opening and closing events.
#[derive(Debug, Default)]
struct Framer {
    /// `Some` once the upstream signalled completion.
    finish: Option<Option<&'static str>>,
    output_tokens: u32,
}

impl Framer {
    fn on_line(&mut self, line: &str, stats: &RelayStats) -> Option<Bytes> {
        match decode_line(line) {
            Frame::Chunk(chunk) => self.on_chunk(&chunk),
            Frame::Done | Frame::Blank => None,
            Frame::Dropped => {
                stats.record_drop(line);
                None
            }
        }
    }

    fn on_chunk(&mut self, chunk: &ChatChunk) -> Option<Bytes> {
        if let Some(usage) = chunk.usage {
            self.output_tokens = usage.completion_tokens;
        }
        if self.finish.is_some() {
            return None;
        }

        match translate_chunk(chunk)? {
            StreamSignal::TextDelta(text) => Some(sse_event(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": text}
                }),
            )),
            StreamSignal::TurnComplete(reason) => {
                self.finish = Some(reason);
                None
            }
        }
    }

    fn closing(&self) -> [Bytes; 3] {
        let stop_reason = self.finish.unwrap_or(Some("end_turn"));
        [
            sse_event(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": 0}),
            ),
            sse_event(
                "message_delta",
                &json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                    "usage": {"output_tokens": self.output_tokens}
                }),
            ),
            sse_event("message_stop", &json!({"type": "message_stop"})),
        ]
    }
}

fn opening(model: &str) -> [Bytes; 2] {
    [
        sse_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": new_message_id(),
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }
            }),
        ),
        sse_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }),
        ),
    ]
}

/// Translate an upstream byte stream into Anthropic SSE events.
///
/// A transport error ends the output without the closing sequence. Dropping
/// the returned stream drops `upstream`.
pub fn translate_stream<S, B, E>(
    upstream: S,
    model: String,
    stats: Arc<RelayStats>,
) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    stream! {
        for event in opening(&model) {
            yield Ok::<Bytes, Infallible>(event);
        }

        let mut upstream = Box::pin(upstream);
        let mut lines = LineBuffer::default();
        let mut framer = Framer::default();

        while let Some(item) = upstream.next().await {
            match item {
                Ok(bytes) => {
                    for line in lines.push(bytes.as_ref()) {
                        if let Some(event) = framer.on_line(&line, &stats) {
                            yield Ok(event);
                        }
                    }
                    for _ in 0..lines.take_oversized() {
                        stats.record_oversized();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream failed; ending response");
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(event) = framer.on_line(&line, &stats) {
                yield Ok(event);
            }
        }

        for event in framer.closing() {
            yield Ok(event);
        }
    }
}
