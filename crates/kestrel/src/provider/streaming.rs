//! Server-Sent Events (SSE) decoding for OpenAI-shaped chat completion
//! streams.
//!
//! [`SseDecoder`] turns raw body chunks into [`StreamEvent`]s as they arrive,
//! buffering partial lines across chunk boundaries. [`StreamAccumulator`]
//! folds the events back into a complete [`ChatResponse`].

use super::ChatResponse;
use crate::ToolCall;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// A single event from an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// A tool call fragment, accumulated by `index` until complete.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Token usage (sent in the final chunk).
    Usage { input_tokens: u64, output_tokens: u64 },
    /// The model stopped for the given reason.
    Finish(String),
    /// The stream is complete.
    Done,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct WireUsage {
    pub(crate) prompt_tokens: Option<u64>,
    pub(crate) completion_tokens: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
struct StreamToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Incremental SSE line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Raw bytes of the current incomplete line. Kept undecoded so a
    /// multi-byte character split across chunks survives intact.
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a body chunk and return the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while !self.done
            && let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n')
        {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.handle_line(String::from_utf8_lossy(&line).trim(), &mut events);
        }
        events
    }

    /// Flush a trailing line without newline and make sure the stream ends
    /// with [`StreamEvent::Done`].
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let remaining = std::mem::take(&mut self.buffer);
        if !self.done {
            self.handle_line(String::from_utf8_lossy(&remaining).trim(), &mut events);
        }
        if !self.done {
            self.done = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return;
        };
        if data == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }
        parse_sse_data(data, events);
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str, events: &mut Vec<StreamEvent>) {
    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e}; data: {data}");
            return;
        }
    };

    for choice in chunk.choices.unwrap_or_default() {
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content
                && !content.is_empty()
            {
                events.push(StreamEvent::TextDelta(content));
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = tc
                    .function
                    .map(|f| (f.name, f.arguments.unwrap_or_default()))
                    .unwrap_or_default();
                events.push(StreamEvent::ToolCallDelta {
                    index: tc.index.unwrap_or(0),
                    id: tc.id,
                    name,
                    arguments_delta: arguments,
                });
            }
        }
        if let Some(reason) = choice.finish_reason {
            trace!("Stream finish_reason: {reason}");
            events.push(StreamEvent::Finish(reason));
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage {
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
        });
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds stream events into a [`ChatResponse`].
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    input_tokens: u64,
    output_tokens: u64,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => self.text.push_str(delta),
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            } => {
                let call = self.tool_calls.entry(*index).or_default();
                if let Some(id) = id {
                    call.id.clone_from(id);
                }
                if let Some(name) = name {
                    call.name.push_str(name);
                }
                call.arguments.push_str(arguments_delta);
            }
            StreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                self.input_tokens = *input_tokens;
                self.output_tokens = *output_tokens;
            }
            StreamEvent::Finish(reason) => self.finish_reason = Some(reason.clone()),
            StreamEvent::Done => {}
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Assemble the final response. Tool calls are ordered by stream index.
    pub fn finish(self) -> ChatResponse {
        let tool_calls = self
            .tool_calls
            .into_values()
            .map(|c| ToolCall::new(c.id, c.name, super::openrouter::parse_arguments(&c.arguments)))
            .collect();
        ChatResponse {
            content: self.text,
            tool_calls,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_deltas_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(events.is_empty());
        events.extend(decoder.push(b"lo\"}}]}\n\n: keep-alive\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n"));
        events.extend(decoder.push(b"data: [DONE]\n"));
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hello".into()),
                StreamEvent::TextDelta(" world".into()),
                StreamEvent::Done,
            ]
        );
        assert!(decoder.is_done());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n\n".as_bytes();
        // One byte into the three-byte encoding of the first character.
        let split = body.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(&body[..split]);
        assert!(events.is_empty());
        events.extend(decoder.push(&body[split..]));
        assert_eq!(events, vec![StreamEvent::TextDelta("你好".into())]);

        // Same split, but the line only ends at finish().
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}".as_bytes();
        let split = body.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&body[..split]).is_empty());
        assert!(decoder.push(&body[split..]).is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamEvent::TextDelta("é".into()), StreamEvent::Done]
        );
    }

    #[test]
    fn finish_flushes_and_terminates() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"");
        let events = decoder.finish();
        assert_eq!(events, vec![StreamEvent::Done]);

        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
        let events = decoder.finish();
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("tail".into()), StreamEvent::Done]
        );
    }

    #[test]
    fn malformed_chunk_is_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {not json}\n");
        assert!(events.is_empty());
    }

    #[test]
    fn tool_calls_and_usage_assemble() {
        let mut decoder = SseDecoder::new();
        let stream = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\\\"pa\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"th\\\":\\\"a.rs\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"usage\":{\"prompt_tokens\":120,\"completion_tokens\":30}}\n",
            "data: [DONE]\n",
        );
        let mut acc = StreamAccumulator::new();
        for event in decoder.push(stream.as_bytes()) {
            acc.apply(&event);
        }
        let response = acc.finish();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_1");
        assert_eq!(response.tool_calls[0].name, "read_file");
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "a.rs"}));
        assert_eq!(response.input_tokens, 120);
        assert_eq!(response.output_tokens, 30);
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn accumulator_collects_text() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&StreamEvent::TextDelta("Hello ".into()));
        acc.apply(&StreamEvent::TextDelta("world!".into()));
        acc.apply(&StreamEvent::Done);
        assert_eq!(acc.text(), "Hello world!");
        assert_eq!(acc.finish().content, "Hello world!");
    }
}
