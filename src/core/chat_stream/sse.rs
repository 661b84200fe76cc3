//! Incremental decoder for the `data:` line protocol used by streamed
//! completions.

use memchr::memchr;
use tracing::debug;

use crate::api::ChatResponse;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Increment(String),
    Done,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Interpret one complete line.
///
/// Lines without the `data:` marker, blank payloads, fragments that fail to
/// decode and fragments without delta content all yield nothing.
pub fn parse_line(line: &str) -> Option<SseEvent> {
    let payload = extract_data_payload(line.trim())?;
    if payload == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    if payload.is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(fragment) => fragment
            .into_increment()
            .filter(|content| !content.is_empty())
            .map(SseEvent::Increment),
        Err(err) => {
            debug!(error = %err, payload, "Skipping undecodable stream fragment");
            None
        }
    }
}

/// Buffers raw body bytes and splits them into lines.
///
/// Chunks from the network can end mid-line or mid-codepoint, so nothing is
/// decoded until a full line is available. Once the sentinel has been seen
/// every later byte is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            self.handle_line(&line[..newline_pos], &mut events);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a final newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.handle_line(&line, &mut events);
        }
        self.done = true;
        events
    }

    fn handle_line(&mut self, raw: &[u8], events: &mut Vec<SseEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                debug!(error = %err, "Skipping stream line with invalid UTF-8");
                return;
            }
        };

        match parse_line(line) {
            Some(SseEvent::Done) => {
                self.done = true;
                events.push(SseEvent::Done);
            }
            Some(event) => events.push(event),
            None => {}
        }
    }
}
