//! Incremental parser for `text/event-stream` bodies.
//!
//! The transport reads raw byte chunks off the HTTP response; chunk
//! boundaries fall anywhere, including mid-line. The parser buffers bytes,
//! splits on line endings (LF or CRLF), and assembles frames per the SSE
//! wire format: `event:` names the kind, `id:` sets the sticky resume token,
//! `data:` lines accumulate (joined with newlines) until a blank line
//! dispatches the frame. Comment lines (leading `:`) are server heartbeats
//! and are dropped.

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Last seen `id:` value; sticky across frames per the SSE spec.
    pub id: Option<String>,
    /// Joined `data:` payload.
    pub data: String,
}

/// Incremental SSE parser. Feed chunks, collect completed frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line, &mut frames);
        }
        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            // Blank line dispatches; a frame without data is not an event.
            let event = self.event.take();
            if self.data.is_empty() {
                return;
            }
            frames.push(SseFrame {
                event,
                id: self.id.clone(),
                data: self.data.join("\n"),
            });
            self.data.clear();
            return;
        }
        if line.starts_with(':') {
            // Heartbeat comment.
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => {
                // NUL in an id is invalid; empty resets the token.
                if !value.contains('\0') {
                    self.id = if value.is_empty() {
                        None
                    } else {
                        Some(value.to_string())
                    };
                }
            }
            // `retry:` hints and unknown fields are ignored; reconnect pacing
            // is the session manager's policy.
            _ => {}
        }
    }
}
