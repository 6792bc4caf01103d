//! Incremental `text/event-stream` decoder.

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, `None` when absent or empty.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream.
    pub id: Option<String>,
    /// Reconnection time requested by the server, in milliseconds.
    pub retry: Option<u64>,
}

/// Splits a byte stream into [`SseFrame`]s.
///
/// Chunks may end anywhere, including inside a UTF-8 sequence or between `\r`
/// and `\n`; incomplete lines are kept until the next chunk. A chunk ending in
/// `\r` completes its line at once, and a `\n` opening the next chunk is then
/// taken as the second half of that `\r\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<u64>,
    seen_first_line: bool,
    skip_lf: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let chunk = if self.skip_lf && !chunk.is_empty() {
            self.skip_lf = false;
            chunk.strip_prefix(b"\n").unwrap_or(chunk)
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let consumed = if self.buffer[pos] == b'\r' {
                match self.buffer.get(pos + 1) {
                    None => {
                        self.skip_lf = true;
                        pos + 1
                    }
                    Some(b'\n') => pos + 2,
                    Some(_) => pos + 1,
                }
            } else {
                pos + 1
            };

            let raw: Vec<u8> = self.buffer.drain(..consumed).take(pos).collect();
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if !self.seen_first_line {
                self.seen_first_line = true;
                if let Some(stripped) = line.strip_prefix('\u{feff}') {
                    line = stripped.to_string();
                }
            }

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseFrame {
            event: event.filter(|e| !e.is_empty()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.last_id.clone(),
            retry: self.retry.take(),
        })
    }
}
