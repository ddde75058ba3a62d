//! Anthropic <-> chat-completions translation.
//!
//! Pure conversions:
//! - Anthropic `/v1/messages` request -> `chat/completions` request
//! - `chat/completions` response -> Anthropic `/v1/messages` response
//! - one streamed `chat.completion.chunk` -> at most one [`StreamSignal`]
//!
//! Only text survives the trip. Image and tool blocks, tool declarations,
//! `top_k` and stop sequences have no counterpart upstream and are dropped.

use crate::config::ModelMap;
use crate::types::{
    ChatChunk, ChatCompletion, ChatContent, ChatMessage, ChatRequest, ChatRole, ContentBlock,
    MessagesRequest, MessagesResponse, Role, Usage,
};

/// Inputs to the request translation that come from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions<'a> {
    pub models: &'a ModelMap,
    pub instructions: Option<&'a str>,
}

/// Convert an Anthropic Messages request into a `chat/completions` request.
pub fn to_chat_request(req: &MessagesRequest, opts: RequestOptions<'_>) -> ChatRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &req.system {
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: system.text(),
        });
    }

    messages.extend(req.messages.iter().map(|msg| ChatMessage {
        role: msg.role.into(),
        content: msg.content.text(),
    }));

    ChatRequest {
        model: opts.models.resolve(&req.model).to_string(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.is_streaming(),
        instructions: opts.instructions.map(str::to_string),
        store: false,
    }
}

/// Map an upstream finish reason onto an Anthropic stop reason.
pub fn map_finish_reason(reason: &str) -> Option<&'static str> {
    match reason {
        "stop" => Some("end_turn"),
        "length" => Some("max_tokens"),
        _ => None,
    }
}

/// Convert a `chat/completions` response into an Anthropic Messages response.
///
/// `id` is used when the upstream did not supply one; `model` is the caller's
/// original model id.
pub fn to_messages_response(resp: ChatCompletion, id: String, model: &str) -> MessagesResponse {
    let usage = resp
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let first = resp.choices.into_iter().next();
    let stop_reason = first
        .as_ref()
        .and_then(|c| c.finish_reason.as_deref())
        .and_then(map_finish_reason)
        .map(str::to_string);

    let content = match first.and_then(|c| c.message).and_then(|m| m.content) {
        Some(ChatContent::Text(text)) if !text.is_empty() => vec![ContentBlock::Text { text }],
        Some(ChatContent::Parts(parts)) => parts
            .into_iter()
            .filter(|p| matches!(p.kind.as_str(), "text" | "output_text"))
            .filter_map(|p| p.text)
            .map(|text| ContentBlock::Text { text })
            .collect(),
        _ => Vec::new(),
    };

    MessagesResponse {
        id: resp.id.unwrap_or(id),
        kind: "message".to_string(),
        role: Role::Assistant,
        content,
        model: model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

/// What one upstream chunk means for the downstream event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    TextDelta(String),
    /// Upstream finished; carries the mapped stop reason, if any.
    TurnComplete(Option<&'static str>),
}

/// Translate one streamed chunk. Heartbeats and other empty shapes yield `None`.
pub fn translate_chunk(chunk: &ChatChunk) -> Option<StreamSignal> {
    let choice = chunk.choices.first()?;

    if let Some(reason) = &choice.finish_reason {
        return Some(StreamSignal::TurnComplete(map_finish_reason(reason)));
    }

    choice
        .delta
        .as_ref()
        .and_then(|d| d.content.as_deref())
        .filter(|text| !text.is_empty())
        .map(|text| StreamSignal::TextDelta(text.to_string()))
}

/// Rough token estimate for `count_tokens`: one token per four characters.
pub fn estimate_tokens(req: &ChatRequest) -> u32 {
    let chars: usize = req.messages.iter().map(|m| m.content.chars().count()).sum();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}
